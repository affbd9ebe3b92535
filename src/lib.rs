//! # zippr
//!
//! A ZIP archive engine with a small command-line front end.
//!
//! The library lists, creates, extends and extracts ZIP archives, and can generate
//! large synthetic files for stress testing. All operations are synchronous and
//! report failures through [`ZipError`].
//!
//! ## Features
//!
//! - Listing an archive from its Central Directory alone
//! - Creating and appending archives, written to a temporary file and renamed into place
//! - Extraction with include/exclude patterns, overwrite policies and path traversal checks
//! - ZIP64 for archives and entries over 4 GiB or with more than 65535 entries
//! - STORED and DEFLATE compression methods
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use zippr::{UnzipOptions, ZipOptions};
//!
//! fn main() -> zippr::Result<()> {
//!     let archive = Path::new("backup.zip");
//!     zippr::zip(archive, &["src", "Cargo.toml"], &ZipOptions::default())?;
//!
//!     for entry in zippr::list(archive)? {
//!         println!("{} ({} bytes)", entry.file_name, entry.uncompressed_size);
//!     }
//!
//!     zippr::unzip(archive, Path::new("restored"), &UnzipOptions::default())?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod generate;
pub mod io;
pub mod pattern;
pub mod zip;

pub use archive::{OverwritePolicy, UnzipOptions, ZipMode, ZipOptions, list, unzip, zip};
pub use cli::Cli;
pub use error::{ErrorKind, Result, ZipError};
pub use generate::{FillPolicy, generate, generate_mb};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use pattern::EntryFilter;
pub use zip::{
    CompressionMethod, DuplicatePolicy, EntryHeader, EntryKind, ZipExtractor, ZipFileEntry,
    ZipWriter,
};
