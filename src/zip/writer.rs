use log::debug;
use std::io::{Read, Seek, Write};

use crate::error::{Result, ZipError};

use super::directory::{CentralDirectory, DuplicatePolicy, serialize_end_records};
use super::stream::{EntryHeader, write_buffered_entry, write_entry};
use super::structures::ZipFileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Finalized,
    /// A write failed after the local header went out; the output holds a partial entry.
    Failed,
}

/// ZIP archive writer.
///
/// Entries are appended in call order; [`finish`](Self::finish) writes the Central
/// Directory and end records. Nothing can be added after that.
///
/// An entry that fails partway through leaves a partial local entry in the output,
/// so the writer refuses further work with [`ZipError::ArchiveClosed`]. A rejected
/// duplicate name writes nothing and keeps the writer open.
pub struct ZipWriter<W: Write + Seek> {
    out: W,
    directory: CentralDirectory,
    duplicates: DuplicatePolicy,
    /// Entries before this index were already in the archive when it was resumed.
    first_new: usize,
    state: WriterState,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Start a new archive at the current position of `out`.
    pub fn new(out: W) -> Self {
        Self::resume(out, CentralDirectory::new())
    }

    /// Continue an archive whose local entries are already in `out`.
    ///
    /// `out` must be positioned right after the last existing entry's data, i.e.
    /// where the old Central Directory used to start.
    pub fn resume(out: W, existing: CentralDirectory) -> Self {
        let first_new = existing.len();
        Self {
            out,
            directory: existing,
            duplicates: DuplicatePolicy::default(),
            first_new,
            state: WriterState::Open,
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Finalized | WriterState::Failed => Err(ZipError::ArchiveClosed),
        }
    }

    /// Stream an entry from `source`.
    pub fn add_entry<R: Read>(&mut self, header: &EntryHeader, source: R) -> Result<&ZipFileEntry> {
        self.ensure_open()?;
        self.directory.check_name(&header.name, self.duplicates)?;
        let written = write_entry(&mut self.out, header, source);
        let entry = self.track_failure(written)?;
        self.push(entry)
    }

    /// Add an entry whose content is already in memory.
    pub fn add_bytes(&mut self, header: &EntryHeader, data: &[u8]) -> Result<&ZipFileEntry> {
        self.ensure_open()?;
        self.directory.check_name(&header.name, self.duplicates)?;
        let written = write_buffered_entry(&mut self.out, header, data);
        let entry = self.track_failure(written)?;
        self.push(entry)
    }

    fn track_failure<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = WriterState::Failed;
        }
        result
    }

    fn push(&mut self, entry: ZipFileEntry) -> Result<&ZipFileEntry> {
        self.directory.push(entry, self.duplicates)?;
        let last = self.directory.len() - 1;
        Ok(&self.directory.entries()[last])
    }

    /// Write the Central Directory and end records.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;
        let cd_offset = self.out.stream_position()?;
        let cd = self.directory.serialize();
        self.out.write_all(&cd)?;
        self.out.write_all(&serialize_end_records(
            self.directory.len() as u64,
            cd_offset,
            cd.len() as u64,
        ))?;
        self.out.flush()?;
        self.state = WriterState::Finalized;
        debug!(
            "finalized archive: {} entries, directory at {}",
            self.directory.len(),
            cd_offset
        );
        Ok(())
    }

    /// Every entry in the archive, in write order.
    pub fn entries(&self) -> &[ZipFileEntry] {
        self.directory.entries()
    }

    /// Entries added through this writer, excluding those it resumed with.
    pub fn new_entries(&self) -> &[ZipFileEntry] {
        &self.directory.entries()[self.first_new..]
    }

    pub fn is_finished(&self) -> bool {
        self.state == WriterState::Finalized
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
