//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Only the tail and the directory are read to list an archive; payloads are
//! never touched.

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use std::io::Cursor;

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::directory::CentralDirectory;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Location of the Central Directory as announced by the end records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub cd_offset: u64,
    pub cd_size: u64,
    pub total_entries: u64,
    /// Offset of the first end record (the ZIP64 one when present).
    pub end_offset: u64,
}

/// Low-level ZIP file parser.
///
/// Generic over the reader type so that the same code serves files on disk and
/// archives built in memory.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(&reader);
/// let directory = parser.read_directory()?;
/// for entry in directory.entries() {
///     let offset = parser.get_data_offset(entry)?;
///     // Read file data from offset...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: R,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: R) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// [`ZipError::NotAnArchive`] if no valid EOCD can be found.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::NotAnArchive(format!(
                "file is only {} bytes long",
                self.size
            )));
        }

        // Fast path: no archive comment.
        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must account for every remaining byte.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(ZipError::NotAnArchive(
            "End of Central Directory record not found".into(),
        ))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF). Returns the record and its offset.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<(Zip64EOCD, u64)> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| ZipError::InvalidDirectory {
                offset: eocd_offset,
                reason: "no room for a ZIP64 locator".into(),
            })?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf).map_err(|_| {
            ZipError::InvalidDirectory {
                offset: locator_offset,
                reason: "ZIP64 locator missing".into(),
            }
        })?;

        let eocd64_end = locator.eocd64_offset.checked_add(Zip64EOCD::MIN_SIZE as u64);
        if eocd64_end.is_none_or(|end| end > locator_offset) {
            return Err(ZipError::InvalidDirectory {
                offset: locator_offset,
                reason: format!(
                    "ZIP64 end record offset {} overlaps the locator",
                    locator.eocd64_offset
                ),
            });
        }

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        let eocd64 =
            Zip64EOCD::from_bytes(&eocd64_buf).map_err(|_| ZipError::InvalidDirectory {
                offset: locator.eocd64_offset,
                reason: "bad ZIP64 End of Central Directory signature".into(),
            })?;
        Ok((eocd64, locator.eocd64_offset))
    }

    /// Locate the Central Directory through the end records and sanity-check its bounds.
    pub fn locate_directory(&self) -> Result<DirectoryLocation> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let location = if eocd.is_zip64() {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(eocd_offset)?;
            DirectoryLocation {
                cd_offset: eocd64.cd_offset,
                cd_size: eocd64.cd_size,
                total_entries: eocd64.total_entries,
                end_offset: eocd64_offset,
            }
        } else {
            if eocd.disk_entries != eocd.total_entries {
                return Err(ZipError::InvalidDirectory {
                    offset: eocd_offset,
                    reason: "multi-disk archives are not supported".into(),
                });
            }
            DirectoryLocation {
                cd_offset: eocd.cd_offset as u64,
                cd_size: eocd.cd_size as u64,
                total_entries: eocd.total_entries as u64,
                end_offset: eocd_offset,
            }
        };

        let cd_end = location.cd_offset.checked_add(location.cd_size);
        if cd_end.is_none_or(|end| end > location.end_offset) {
            return Err(ZipError::InvalidDirectory {
                offset: location.cd_offset,
                reason: format!(
                    "directory of {} bytes at {} runs past the end record at {}",
                    location.cd_size, location.cd_offset, location.end_offset
                ),
            });
        }

        debug!(
            "central directory: {} entries, {} bytes at offset {}",
            location.total_entries, location.cd_size, location.cd_offset
        );
        Ok(location)
    }

    /// Read and parse the whole Central Directory in one read.
    pub fn read_directory(&self) -> Result<(CentralDirectory, DirectoryLocation)> {
        let location = self.locate_directory()?;

        let mut cd_data = vec![0u8; location.cd_size as usize];
        self.reader.read_exact_at(location.cd_offset, &mut cd_data)?;

        let directory =
            CentralDirectory::parse(&cd_data, location.cd_offset, location.total_entries)?;

        // Local headers live in front of the directory.
        for entry in directory.entries() {
            let lfh_end = entry.lfh_offset.checked_add(LFH_SIZE as u64);
            if lfh_end.is_none_or(|end| end > location.cd_offset) {
                return Err(ZipError::InvalidDirectory {
                    offset: location.cd_offset,
                    reason: format!(
                        "entry '{}' points at offset {} inside the directory",
                        entry.file_name, entry.lfh_offset
                    ),
                });
            }
        }

        Ok((directory, location))
    }

    /// List all entries in the archive, in directory order.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        Ok(self.read_directory()?.0.into_entries())
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry, so
    /// the LFH itself has to be read.
    pub fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf)?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(ZipError::CorruptData {
                name: entry.file_name.clone(),
                reason: format!("no Local File Header at offset {}", entry.lfh_offset),
            });
        }

        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26); // Offset to filename length field

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        // Data starts after: LFH (30 bytes) + filename + extra field
        let data_offset = entry
            .lfh_offset
            .checked_add(LFH_SIZE as u64 + file_name_length + extra_field_length)
            .ok_or_else(|| ZipError::CorruptData {
                name: entry.file_name.clone(),
                reason: format!("local header offset {} is out of range", entry.lfh_offset),
            })?;

        let data_end = data_offset.checked_add(entry.compressed_size);
        if data_end.is_none_or(|end| end > self.size) {
            return Err(ZipError::CorruptData {
                name: entry.file_name.clone(),
                reason: format!(
                    "{} bytes of data at offset {} run past the end of the archive",
                    entry.compressed_size, data_offset
                ),
            });
        }

        Ok(data_offset)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::directory::serialize_end_records;
    use crate::zip::{CompressionMethod, EntryHeader, ZipWriter};

    #[test]
    fn empty_archive_lists_nothing() {
        let data = serialize_end_records(0, 0, 0);
        let parser = ZipParser::new(MemoryReader::new(data));
        assert!(parser.list_files().unwrap().is_empty());
    }

    #[test]
    fn eocd_found_behind_comment() {
        let mut data = serialize_end_records(0, 0, 0);
        let comment = b"archive comment";
        data[20..22].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        data.extend_from_slice(comment);
        let parser = ZipParser::new(MemoryReader::new(data));
        let (_, offset) = parser.find_eocd().unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn random_bytes_are_not_an_archive() {
        let parser = ZipParser::new(MemoryReader::new(vec![7u8; 1000]));
        assert!(matches!(
            parser.list_files(),
            Err(ZipError::NotAnArchive(_))
        ));
        let parser = ZipParser::new(MemoryReader::new(vec![1, 2, 3]));
        assert!(matches!(
            parser.list_files(),
            Err(ZipError::NotAnArchive(_))
        ));
    }

    #[test]
    fn directory_past_end_is_invalid() {
        let data = serialize_end_records(1, 10, 500);
        let parser = ZipParser::new(MemoryReader::new(data));
        assert!(matches!(
            parser.list_files(),
            Err(ZipError::InvalidDirectory { .. })
        ));
    }

    #[test]
    fn zip64_end_records_are_followed() {
        // 70k entries forces the ZIP64 path; the directory itself is empty, so the
        // count check has to reject it.
        let data = serialize_end_records(70_000, 0, 0);
        let parser = ZipParser::new(MemoryReader::new(data));
        let location = parser.locate_directory().unwrap();
        assert_eq!(location.total_entries, 70_000);
        assert_eq!(location.end_offset, 0);
        assert!(matches!(
            parser.read_directory(),
            Err(ZipError::InvalidDirectory { .. })
        ));
    }

    /// A ZIP64 locator pointing near `u64::MAX`, followed by an EOCD whose fields
    /// are all ZIP64 markers.
    fn overflowing_locator() -> Vec<u8> {
        let mut data = Vec::new();
        Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: u64::MAX - 10,
            total_disks: 1,
        }
        .write_to(&mut data)
        .unwrap();
        data.extend_from_slice(EndOfCentralDirectory::SIGNATURE);
        data.extend_from_slice(&[0xFF; 16]);
        data.extend_from_slice(&[0, 0]);
        data
    }

    #[test]
    fn zip64_offset_near_max_is_invalid() {
        let data = overflowing_locator();
        assert_eq!(data.len(), 42);
        let parser = ZipParser::new(MemoryReader::new(data));
        assert!(matches!(
            parser.list_files(),
            Err(ZipError::InvalidDirectory { .. })
        ));
    }

    fn one_entry_archive() -> (Vec<u8>, ZipFileEntry, u64) {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .add_bytes(&EntryHeader::file("a.txt", CompressionMethod::Stored), b"abc")
            .unwrap();
        let entry = writer.entries()[0].clone();
        writer.finish().unwrap();
        let data = writer.into_inner().into_inner();
        let cd_offset = ZipParser::new(MemoryReader::new(data.clone()))
            .locate_directory()
            .unwrap()
            .cd_offset;
        (data, entry, cd_offset)
    }

    #[test]
    fn header_offset_near_max_is_invalid() {
        let (data, mut entry, cd_offset) = one_entry_archive();
        entry.lfh_offset = u64::MAX - 5;

        let mut directory = CentralDirectory::new();
        directory.push(entry, Default::default()).unwrap();
        let cd = directory.serialize();
        let mut crafted = data[..cd_offset as usize].to_vec();
        crafted.extend_from_slice(&cd);
        crafted.extend_from_slice(&serialize_end_records(1, cd_offset, cd.len() as u64));

        let parser = ZipParser::new(MemoryReader::new(crafted));
        assert!(matches!(
            parser.read_directory(),
            Err(ZipError::InvalidDirectory { .. })
        ));
    }

    #[test]
    fn compressed_size_near_max_is_corrupt() {
        let (data, mut entry, _) = one_entry_archive();
        entry.compressed_size = u64::MAX - 1;
        let parser = ZipParser::new(MemoryReader::new(data));
        assert!(matches!(
            parser.get_data_offset(&entry),
            Err(ZipError::CorruptData { .. })
        ));
    }
}
