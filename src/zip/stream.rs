//! Entry stream engine: moves one archive member in or out.
//!
//! Writing streams the source through the codec in fixed-size chunks and patches the
//! CRC-32 and sizes into the local header afterwards, so the output must be seekable.
//! Reading decompresses on the fly and checks size and CRC-32 when the stream ends.

use crc32fast::Hasher;
use log::debug;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{Result, ZipError};
use crate::io::{ReadAt, SectionReader};

use super::codec::{self, CodecReader, CodecWriter, DEFAULT_LEVEL};
use super::directory::{write_extra_field, write_mtime_field};
use super::parser::ZipParser;
use super::structures::*;

/// Chunk size used when streaming entry data.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Metadata for an entry that is about to be written.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub name: String,
    pub method: CompressionMethod,
    pub level: u32,
    pub modified: SystemTime,
    pub external_attrs: u32,
    pub kind: EntryKind,
    /// Expected uncompressed size. Sizes near 4 GiB switch the local header to ZIP64.
    pub size_hint: Option<u64>,
}

impl EntryHeader {
    pub fn file(name: impl Into<String>, method: CompressionMethod) -> Self {
        Self {
            name: name.into(),
            method,
            level: DEFAULT_LEVEL,
            modified: SystemTime::now(),
            external_attrs: (S_IFREG | 0o644) << 16,
            kind: EntryKind::File,
            size_hint: None,
        }
    }

    /// A directory marker. The name gets a trailing `/` if it lacks one.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            method: CompressionMethod::Stored,
            level: DEFAULT_LEVEL,
            modified: SystemTime::now(),
            external_attrs: ((S_IFDIR | 0o755) << 16) | DOS_DIRECTORY,
            kind: EntryKind::Directory,
            size_hint: Some(0),
        }
    }

    /// A symbolic link; its data is the link target.
    pub fn symlink(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: CompressionMethod::Stored,
            level: DEFAULT_LEVEL,
            modified: SystemTime::now(),
            external_attrs: (S_IFLNK | 0o777) << 16,
            kind: EntryKind::Symlink,
            size_hint: None,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    /// Replace the permission bits, keeping the file type.
    pub fn with_permissions(mut self, mode: u32) -> Self {
        let file_type = (self.external_attrs >> 16) & S_IFMT;
        let dos = self.external_attrs & 0xFFFF;
        self.external_attrs = ((file_type | (mode & 0o7777)) << 16) | dos;
        self
    }

    fn wants_zip64(&self) -> bool {
        // Leave headroom for deflate's worst-case expansion.
        self.size_hint
            .is_some_and(|size| {
                size.saturating_add(size / 128).saturating_add(1024) >= ZIP64_MARKER_U32 as u64
            })
    }

    fn effective_method(&self) -> CompressionMethod {
        match self.kind {
            EntryKind::Directory => CompressionMethod::Stored,
            _ if self.size_hint == Some(0) => CompressionMethod::Stored,
            _ => self.method,
        }
    }
}

/// Write counter sitting between the codec and the archive.
struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Local header fields fixed before the data is written.
struct PendingEntry {
    lfh_offset: u64,
    method: CompressionMethod,
    zip64: bool,
    flags: u16,
    last_mod_time: u16,
    last_mod_date: u16,
    mtime: i64,
}

/// Write the local header with zeroed CRC and sizes.
fn begin_entry<W: Write + Seek>(
    out: &mut W,
    header: &EntryHeader,
    method: CompressionMethod,
    zip64: bool,
) -> Result<PendingEntry> {
    if header.name.is_empty() || header.name.len() > u16::MAX as usize {
        return Err(ZipError::InvalidArgument(format!(
            "entry name must be 1 to 65535 bytes long: '{}'",
            header.name
        )));
    }

    let lfh_offset = out.stream_position()?;
    let (last_mod_time, last_mod_date) = dos_date_time(header.modified);
    let mtime = unix_seconds(header.modified);

    let mut extra = Vec::new();
    if zip64 {
        write_extra_field(&mut extra, ZIP64_EXTRA_ID, &[0u8; 16])?;
    }
    write_mtime_field(&mut extra, mtime)?;

    let flags = if header.name.is_ascii() { 0 } else { FLAG_UTF8 };
    let lfh = LocalFileHeader {
        version_needed: method.version_needed(zip64),
        flags,
        compression_method: method,
        last_mod_time,
        last_mod_date,
        crc32: 0,
        compressed_size: if zip64 { ZIP64_MARKER_U32 } else { 0 },
        uncompressed_size: if zip64 { ZIP64_MARKER_U32 } else { 0 },
        file_name: header.name.as_bytes().to_vec(),
        extra_field: extra,
    };
    lfh.write_to(out)?;

    Ok(PendingEntry {
        lfh_offset,
        method,
        zip64,
        flags,
        last_mod_time,
        last_mod_date,
        mtime,
    })
}

/// Patch CRC and sizes into the local header and build the entry metadata.
fn end_entry<W: Write + Seek>(
    out: &mut W,
    header: &EntryHeader,
    pending: PendingEntry,
    crc32: u32,
    uncompressed_size: u64,
    compressed_size: u64,
) -> Result<ZipFileEntry> {
    if !pending.zip64
        && (compressed_size >= ZIP64_MARKER_U32 as u64
            || uncompressed_size >= ZIP64_MARKER_U32 as u64)
    {
        return Err(ZipError::InvalidArgument(format!(
            "entry '{}' grew past 4 GiB without a matching size hint",
            header.name
        )));
    }

    let data_end = out.stream_position()?;
    out.seek(SeekFrom::Start(pending.lfh_offset + LFH_CRC_OFFSET))?;
    out.write_u32::<LittleEndian>(crc32)?;
    if pending.zip64 {
        // Sizes live in the ZIP64 extra field, right after its 4-byte header.
        out.seek(SeekFrom::Start(
            pending.lfh_offset + LFH_SIZE as u64 + header.name.len() as u64 + 4,
        ))?;
        out.write_u64::<LittleEndian>(uncompressed_size)?;
        out.write_u64::<LittleEndian>(compressed_size)?;
    } else {
        out.write_u32::<LittleEndian>(compressed_size as u32)?;
        out.write_u32::<LittleEndian>(uncompressed_size as u32)?;
    }
    out.seek(SeekFrom::Start(data_end))?;

    debug!(
        "wrote '{}': {} -> {} bytes, crc {:08x}",
        header.name, uncompressed_size, compressed_size, crc32
    );

    Ok(ZipFileEntry {
        file_name: header.name.clone(),
        compression_method: pending.method,
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset: pending.lfh_offset,
        last_mod_time: pending.last_mod_time,
        last_mod_date: pending.last_mod_date,
        version_made_by: VERSION_MADE_BY,
        flags: pending.flags,
        external_attrs: header.external_attrs,
        mtime: Some(pending.mtime),
        is_directory: header.kind == EntryKind::Directory,
        extra_fields: Vec::new(),
        comment: Vec::new(),
    })
}

/// Stream `source` into `out` as one complete entry (local header plus data).
///
/// CRC-32 is accumulated over the uncompressed bytes. The returned metadata is fully
/// populated and ready for the Central Directory.
pub fn write_entry<W, R>(out: &mut W, header: &EntryHeader, mut source: R) -> Result<ZipFileEntry>
where
    W: Write + Seek,
    R: Read,
{
    let pending = begin_entry(out, header, header.effective_method(), header.wants_zip64())?;

    let mut hasher = Hasher::new();
    let mut uncompressed_size = 0u64;
    let counting = CountingWriter {
        inner: &mut *out,
        count: 0,
    };
    let mut encoder = CodecWriter::new(counting, pending.method, header.level)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
        uncompressed_size += n as u64;
        encoder.write_all(&buf[..n])?;
    }
    let compressed_size = encoder.finish()?.count;

    end_entry(
        out,
        header,
        pending,
        hasher.finalize(),
        uncompressed_size,
        compressed_size,
    )
}

/// Write an entry whose data is already in memory.
///
/// Compression happens up front, so data that deflate cannot shrink is stored instead.
pub fn write_buffered_entry<W: Write + Seek>(
    out: &mut W,
    header: &EntryHeader,
    data: &[u8],
) -> Result<ZipFileEntry> {
    let (payload, method) = if header.kind == EntryKind::Directory {
        (Vec::new(), CompressionMethod::Stored)
    } else {
        codec::compress(data, header.method, header.level)?
    };
    let zip64 = payload.len() as u64 >= ZIP64_MARKER_U32 as u64
        || data.len() as u64 >= ZIP64_MARKER_U32 as u64;
    let pending = begin_entry(out, header, method, zip64)?;
    out.write_all(&payload)?;
    end_entry(
        out,
        header,
        pending,
        crc32fast::hash(data),
        data.len() as u64,
        payload.len() as u64,
    )
}

/// Read a whole entry into memory and verify it.
pub fn read_entry<R: ReadAt>(parser: &ZipParser<R>, entry: &ZipFileEntry) -> Result<Vec<u8>> {
    let compressed_len =
        usize::try_from(entry.compressed_size).map_err(|_| ZipError::CorruptData {
            name: entry.file_name.clone(),
            reason: format!("{} bytes do not fit in memory", entry.compressed_size),
        })?;
    let data_offset = parser.get_data_offset(entry)?;
    let mut compressed = vec![0u8; compressed_len];
    parser.reader().read_exact_at(data_offset, &mut compressed)?;

    let data = codec::decompress(
        &compressed,
        entry.compression_method,
        entry.uncompressed_size,
        &entry.file_name,
    )?;
    verify_crc(entry, crc32fast::hash(&data))?;
    Ok(data)
}

fn verify_crc(entry: &ZipFileEntry, actual: u32) -> Result<()> {
    if actual != entry.crc32 {
        return Err(ZipError::ChecksumMismatch {
            name: entry.file_name.clone(),
            expected: entry.crc32,
            actual,
        });
    }
    Ok(())
}

/// Streaming reader over one entry's uncompressed bytes.
///
/// Size and CRC-32 are validated when the end of the data is reached; a mismatch is
/// returned as an error from that final `read` instead of a clean end of stream.
pub struct EntryReader<'a, R: ReadAt> {
    decoder: CodecReader<SectionReader<'a, R>>,
    entry: &'a ZipFileEntry,
    hasher: Hasher,
    produced: u64,
    finished: bool,
}

impl<'a, R: ReadAt> EntryReader<'a, R> {
    pub fn new(parser: &'a ZipParser<R>, entry: &'a ZipFileEntry) -> Result<Self> {
        let data_offset = parser.get_data_offset(entry)?;
        let section = SectionReader::new(parser.reader(), data_offset, entry.compressed_size);
        let decoder = CodecReader::new(section, entry.compression_method, &entry.file_name)?;
        Ok(Self {
            decoder,
            entry,
            hasher: Hasher::new(),
            produced: 0,
            finished: false,
        })
    }

    fn finish(&mut self) -> Result<()> {
        if self.produced != self.entry.uncompressed_size {
            return Err(ZipError::CorruptData {
                name: self.entry.file_name.clone(),
                reason: format!(
                    "expected {} bytes after decompression, got {}",
                    self.entry.uncompressed_size, self.produced
                ),
            });
        }
        let actual = self.hasher.clone().finalize();
        verify_crc(self.entry, actual)
    }
}

impl<R: ReadAt> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let n = self.decoder.read(buf)?;
        if n == 0 {
            self.finished = true;
            self.finish().map_err(ZipError::into_io)?;
            return Ok(0);
        }
        self.produced += n as u64;
        if self.produced > self.entry.uncompressed_size {
            self.finished = true;
            return Err(ZipError::CorruptData {
                name: self.entry.file_name.clone(),
                reason: format!(
                    "data expands past the expected {} bytes",
                    self.entry.uncompressed_size
                ),
            }
            .into_io());
        }
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Read `len` uncompressed bytes starting at `offset` without materialising the
/// whole entry. The CRC-32 cannot be checked on a partial read.
pub fn read_range<R: ReadAt>(
    parser: &ZipParser<R>,
    entry: &ZipFileEntry,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>> {
    let end = offset.checked_add(len);
    if end.is_none_or(|end| end > entry.uncompressed_size) {
        return Err(ZipError::InvalidArgument(format!(
            "range {}+{} is outside entry '{}' of {} bytes",
            offset, len, entry.file_name, entry.uncompressed_size
        )));
    }
    let len_usize = usize::try_from(len).map_err(|_| {
        ZipError::InvalidArgument(format!("range of {} bytes does not fit in memory", len))
    })?;

    let data_offset = parser.get_data_offset(entry)?;
    if entry.compression_method == CompressionMethod::Stored {
        if entry.compressed_size != entry.uncompressed_size {
            return Err(ZipError::CorruptData {
                name: entry.file_name.clone(),
                reason: "stored entry with differing sizes".into(),
            });
        }
        let mut out = vec![0u8; len_usize];
        parser
            .reader()
            .read_exact_at(data_offset + offset, &mut out)?;
        return Ok(out);
    }

    let section = SectionReader::new(parser.reader(), data_offset, entry.compressed_size);
    let mut decoder = CodecReader::new(section, entry.compression_method, &entry.file_name)?;
    let skipped = io::copy(&mut (&mut decoder).take(offset), &mut io::sink())?;
    let mut out = Vec::with_capacity(len_usize);
    (&mut decoder).take(len).read_to_end(&mut out)?;

    if skipped != offset || out.len() != len_usize {
        return Err(ZipError::CorruptData {
            name: entry.file_name.clone(),
            reason: format!(
                "stream ended before byte {} of {}",
                skipped + out.len() as u64,
                offset + len
            ),
        });
    }
    Ok(out)
}
