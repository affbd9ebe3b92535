//! ZIP archive reading and writing.
//!
//! This module provides functionality for reading, writing and extracting ZIP
//! archives, supporting both the standard ZIP format and ZIP64 extensions for
//! large archives.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`codec`]: Store and deflate, on buffers and as streams
//! - [`directory`]: Central Directory parsing and serialization
//! - [`parser`]: Locating and reading the end records and the directory
//! - [`stream`]: Moving a single entry in or out, with CRC-32 bookkeeping
//! - [`writer`] / [`extractor`]: Whole-archive write and read handles
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Archives are read from the end: EOCD first, then the Central Directory,
//! which allows listing files without reading the entire archive.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB and more than 65535 entries
//! - STORED (no compression) method
//! - DEFLATE compression method
//! - Unix permissions, symlinks and the extended timestamp extra field
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

pub mod codec;
pub mod directory;
mod extractor;
mod parser;
pub mod stream;
mod structures;
mod writer;

pub use directory::{CentralDirectory, DuplicatePolicy};
pub use extractor::{ArchiveState, ZipExtractor};
pub use parser::{DirectoryLocation, ZipParser};
pub use stream::{EntryHeader, EntryReader};
pub use structures::*;
pub use writer::ZipWriter;
