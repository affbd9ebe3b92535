use log::debug;
use std::cell::Cell;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::directory::CentralDirectory;
use super::parser::{DirectoryLocation, ZipParser};
use super::stream::{self, EntryReader};
use super::structures::ZipFileEntry;

/// Lifecycle of an opened archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Opened,
    Reading,
    Closed,
}

/// ZIP file extractor
///
/// The Central Directory is parsed once in [`open`](Self::open); every later call
/// works from that copy. Once [`close`](Self::close) is called, all operations fail
/// with [`ZipError::ArchiveClosed`].
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
    directory: CentralDirectory,
    location: DirectoryLocation,
    state: Cell<ArchiveState>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn open(reader: R) -> Result<Self> {
        let parser = ZipParser::new(reader);
        let (directory, location) = parser.read_directory()?;
        debug!("opened archive with {} entries", directory.len());
        Ok(Self {
            parser,
            directory,
            location,
            state: Cell::new(ArchiveState::Opened),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state.get() {
            ArchiveState::Closed => Err(ZipError::ArchiveClosed),
            _ => Ok(()),
        }
    }

    fn start_reading(&self) -> Result<()> {
        self.ensure_open()?;
        self.state.set(ArchiveState::Reading);
        Ok(())
    }

    pub fn state(&self) -> ArchiveState {
        self.state.get()
    }

    /// List all files in the archive
    pub fn list_files(&self) -> Result<&[ZipFileEntry]> {
        self.ensure_open()?;
        Ok(self.directory.entries())
    }

    /// Find an entry by name; the last one wins when names repeat.
    pub fn find(&self, name: &str) -> Result<Option<&ZipFileEntry>> {
        self.ensure_open()?;
        Ok(self.directory.find(name))
    }

    /// Where the Central Directory sits in the archive.
    pub fn location(&self) -> DirectoryLocation {
        self.location
    }

    /// Extract file data to memory
    pub fn read(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        self.start_reading()?;
        stream::read_entry(&self.parser, entry)
    }

    /// Streaming reader over an entry's data, verified at end of stream.
    pub fn reader<'a>(&'a self, entry: &'a ZipFileEntry) -> Result<EntryReader<'a, R>> {
        self.start_reading()?;
        EntryReader::new(&self.parser, entry)
    }

    /// Read a sub-range of an entry's uncompressed data.
    pub fn read_range(&self, entry: &ZipFileEntry, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.start_reading()?;
        stream::read_range(&self.parser, entry, offset, len)
    }

    /// Stream an entry into `out`, returning the number of bytes written.
    pub fn extract_to_writer<W: Write + ?Sized>(
        &self,
        entry: &ZipFileEntry,
        out: &mut W,
    ) -> Result<u64> {
        let mut reader = self.reader(entry)?;
        Ok(io::copy(&mut reader, out)?)
    }

    /// Extract file to disk
    ///
    /// Data goes to a temporary file next to `output_path` that only replaces the
    /// destination once the checksum has been verified.
    pub fn extract_to_file(&self, entry: &ZipFileEntry, output_path: &Path) -> Result<()> {
        let parent = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        self.extract_to_writer(entry, temp.as_file_mut())?;
        temp.as_file_mut().flush()?;
        temp.persist(output_path).map_err(|e| ZipError::from(e.error))?;
        Ok(())
    }

    /// Extract file to stdout
    pub fn extract_to_stdout(&self, entry: &ZipFileEntry) -> Result<()> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        self.extract_to_writer(entry, &mut lock)?;
        lock.flush()?;
        Ok(())
    }

    /// Close the archive. Later calls fail with [`ZipError::ArchiveClosed`].
    pub fn close(&self) -> Result<()> {
        self.ensure_open()?;
        self.state.set(ArchiveState::Closed);
        Ok(())
    }

    pub fn parser(&self) -> &ZipParser<R> {
        &self.parser
    }
}
