//! Central Directory parsing and serialization.
//!
//! The directory is the archive's index: one header per entry, written once when an
//! archive is finalized and read once when it is opened. Serialization is byte-exact
//! for identical entry metadata and ordering, which keeps archive output reproducible.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashSet;
use std::io::{self, Cursor, Read, Write};

use crate::error::{Result, ZipError};

use super::structures::*;

/// What to do when an entry name is added twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail with [`ZipError::DuplicateEntry`].
    #[default]
    Reject,
    /// Keep both entries; lookups return the last one.
    Allow,
}

/// Ordered collection of entry metadata.
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    entries: Vec<ZipFileEntry>,
    names: HashSet<String>,
}

impl CentralDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `total_entries` Central Directory File Headers from `data`.
    ///
    /// `base_offset` is the position of `data` within the archive and only feeds
    /// error messages. The buffer must hold exactly the announced entries.
    pub fn parse(data: &[u8], base_offset: u64, total_entries: u64) -> Result<Self> {
        // Every header takes at least 46 bytes, so a larger count cannot be honest.
        if total_entries > (data.len() / CDFH_MIN_SIZE) as u64 {
            return Err(ZipError::InvalidDirectory {
                offset: base_offset,
                reason: format!(
                    "{} entries announced but the directory is only {} bytes",
                    total_entries,
                    data.len()
                ),
            });
        }

        let mut directory = Self::new();
        directory.entries.reserve(total_entries as usize);
        let mut cursor = Cursor::new(data);

        for index in 0..total_entries {
            let header_offset = base_offset + cursor.position();
            let entry = parse_cdfh(&mut cursor).map_err(|e| match e {
                ZipError::Io(io_err) => ZipError::InvalidDirectory {
                    offset: header_offset,
                    reason: format!("entry {} is truncated: {}", index, io_err),
                },
                ZipError::InvalidDirectory { reason, .. } => ZipError::InvalidDirectory {
                    offset: header_offset,
                    reason: format!("entry {}: {}", index, reason),
                },
                other => other,
            })?;
            directory.names.insert(entry.file_name.clone());
            directory.entries.push(entry);
        }

        if cursor.position() != data.len() as u64 {
            return Err(ZipError::InvalidDirectory {
                offset: base_offset + cursor.position(),
                reason: format!(
                    "{} trailing bytes after {} entries",
                    data.len() as u64 - cursor.position(),
                    total_entries
                ),
            });
        }

        Ok(directory)
    }

    /// Serialize every entry as a Central Directory File Header, in order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * (CDFH_MIN_SIZE + 32));
        for entry in &self.entries {
            // Writing into a Vec cannot fail.
            let _ = write_cdfh(&mut out, entry);
        }
        out
    }

    /// Fail if `name` is already present and duplicates are rejected.
    pub fn check_name(&self, name: &str, policy: DuplicatePolicy) -> Result<()> {
        if policy == DuplicatePolicy::Reject && self.names.contains(name) {
            return Err(ZipError::DuplicateEntry(name.to_string()));
        }
        Ok(())
    }

    pub fn push(&mut self, entry: ZipFileEntry, policy: DuplicatePolicy) -> Result<()> {
        self.check_name(&entry.file_name, policy)?;
        self.names.insert(entry.file_name.clone());
        self.entries.push(entry);
        Ok(())
    }

    /// Look an entry up by name. When names repeat, the last one written wins.
    pub fn find(&self, name: &str) -> Option<&ZipFileEntry> {
        self.entries.iter().rev().find(|e| e.file_name == name)
    }

    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ZipFileEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a single Central Directory File Header.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(ZipError::InvalidDirectory {
            offset: 0,
            reason: "bad Central Directory File Header signature".into(),
        });
    }

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra)?;

    let mut mtime = None;
    let mut extra_fields = Vec::new();
    for (header_id, field) in ExtraFields::new(&extra) {
        match header_id {
            ZIP64_EXTRA_ID => {
                // Values are present only when the fixed field holds the marker.
                let mut field = Cursor::new(field);
                if uncompressed_size == ZIP64_MARKER_U32 as u64 {
                    uncompressed_size = field.read_u64::<LittleEndian>()?;
                }
                if compressed_size == ZIP64_MARKER_U32 as u64 {
                    compressed_size = field.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == ZIP64_MARKER_U32 as u64 {
                    lfh_offset = field.read_u64::<LittleEndian>()?;
                }
            }
            EXTENDED_TIMESTAMP_ID => {
                if field.len() >= 5 && field[0] & 1 != 0 {
                    mtime = Some(i32::from_le_bytes([field[1], field[2], field[3], field[4]]) as i64);
                }
            }
            _ => write_extra_field(&mut extra_fields, header_id, field)?,
        }
    }

    let mut comment = vec![0u8; file_comment_length as usize];
    cursor.read_exact(&mut comment)?;

    let is_directory = file_name.ends_with('/');

    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        version_made_by,
        flags,
        external_attrs,
        mtime,
        is_directory,
        extra_fields,
        comment,
    })
}

fn write_cdfh<W: Write>(out: &mut W, entry: &ZipFileEntry) -> io::Result<()> {
    let zip64 = entry.needs_zip64();
    let mut extra = Vec::new();
    if zip64 {
        let mut values = Vec::with_capacity(24);
        if entry.uncompressed_size >= ZIP64_MARKER_U32 as u64 {
            values.write_u64::<LittleEndian>(entry.uncompressed_size)?;
        }
        if entry.compressed_size >= ZIP64_MARKER_U32 as u64 {
            values.write_u64::<LittleEndian>(entry.compressed_size)?;
        }
        if entry.lfh_offset >= ZIP64_MARKER_U32 as u64 {
            values.write_u64::<LittleEndian>(entry.lfh_offset)?;
        }
        write_extra_field(&mut extra, ZIP64_EXTRA_ID, &values)?;
    }
    if let Some(mtime) = entry.mtime {
        write_mtime_field(&mut extra, mtime)?;
    }
    if extra.len() + entry.extra_fields.len() <= u16::MAX as usize {
        extra.extend_from_slice(&entry.extra_fields);
    }
    let comment = &entry.comment[..entry.comment.len().min(u16::MAX as usize)];

    let clamp = |v: u64| v.min(ZIP64_MARKER_U32 as u64) as u32;

    out.write_all(CDFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(entry.version_made_by)?;
    out.write_u16::<LittleEndian>(entry.compression_method.version_needed(zip64))?;
    out.write_u16::<LittleEndian>(entry.flags)?;
    out.write_u16::<LittleEndian>(entry.compression_method.as_u16())?;
    out.write_u16::<LittleEndian>(entry.last_mod_time)?;
    out.write_u16::<LittleEndian>(entry.last_mod_date)?;
    out.write_u32::<LittleEndian>(entry.crc32)?;
    out.write_u32::<LittleEndian>(clamp(entry.compressed_size))?;
    out.write_u32::<LittleEndian>(clamp(entry.uncompressed_size))?;
    out.write_u16::<LittleEndian>(entry.file_name.len() as u16)?;
    out.write_u16::<LittleEndian>(extra.len() as u16)?;
    out.write_u16::<LittleEndian>(comment.len() as u16)?;
    out.write_u16::<LittleEndian>(0)?; // disk number start
    out.write_u16::<LittleEndian>(0)?; // internal attributes
    out.write_u32::<LittleEndian>(entry.external_attrs)?;
    out.write_u32::<LittleEndian>(clamp(entry.lfh_offset))?;
    out.write_all(entry.file_name.as_bytes())?;
    out.write_all(&extra)?;
    out.write_all(comment)
}

/// Append one `id, len, data` extra field record.
pub(crate) fn write_extra_field(out: &mut Vec<u8>, id: u16, data: &[u8]) -> io::Result<()> {
    out.write_u16::<LittleEndian>(id)?;
    out.write_u16::<LittleEndian>(data.len() as u16)?;
    out.write_all(data)
}

/// Append an extended timestamp field carrying only the modification time.
pub(crate) fn write_mtime_field(out: &mut Vec<u8>, mtime: i64) -> io::Result<()> {
    let mut data = Vec::with_capacity(5);
    data.push(1u8);
    data.write_i32::<LittleEndian>(mtime.clamp(i32::MIN as i64, i32::MAX as i64) as i32)?;
    write_extra_field(out, EXTENDED_TIMESTAMP_ID, &data)
}

/// Iterator over `(id, data)` records of an extra field block. Stops at the first
/// record that would overrun the block.
struct ExtraFields<'a> {
    data: &'a [u8],
}

impl<'a> ExtraFields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([self.data[0], self.data[1]]);
        let len = u16::from_le_bytes([self.data[2], self.data[3]]) as usize;
        if 4 + len > self.data.len() {
            return None;
        }
        let field = &self.data[4..4 + len];
        self.data = &self.data[4 + len..];
        Some((id, field))
    }
}

/// Serialize the end-of-archive records for a directory of `entry_count` entries at
/// `cd_offset` spanning `cd_size` bytes.
///
/// ZIP64 records are emitted only when a value does not fit the classic layout.
pub fn serialize_end_records(entry_count: u64, cd_offset: u64, cd_size: u64) -> Vec<u8> {
    let zip64 = entry_count >= ZIP64_MARKER_U16 as u64
        || cd_offset >= ZIP64_MARKER_U32 as u64
        || cd_size >= ZIP64_MARKER_U32 as u64;

    let mut out = Vec::with_capacity(
        EndOfCentralDirectory::SIZE + Zip64EOCD::MIN_SIZE + Zip64EOCDLocator::SIZE,
    );

    // Writing into a Vec cannot fail.
    if zip64 {
        let eocd64 = Zip64EOCD {
            eocd64_size: (Zip64EOCD::MIN_SIZE - 12) as u64,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entry_count,
            total_entries: entry_count,
            cd_size,
            cd_offset,
        };
        let _ = eocd64.write_to(&mut out);
        let locator = Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: cd_offset + cd_size,
            total_disks: 1,
        };
        let _ = locator.write_to(&mut out);
    }

    let eocd = EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: entry_count.min(ZIP64_MARKER_U16 as u64) as u16,
        total_entries: entry_count.min(ZIP64_MARKER_U16 as u64) as u16,
        cd_size: cd_size.min(ZIP64_MARKER_U32 as u64) as u32,
        cd_offset: cd_offset.min(ZIP64_MARKER_U32 as u64) as u32,
        comment_len: 0,
    };
    let _ = eocd.write_to(&mut out);
    out
}
