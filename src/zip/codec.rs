//! Store and deflate primitives.
//!
//! The buffer functions ([`compress`], [`decompress`]) work on whole entries held in
//! memory. [`CodecWriter`] and [`CodecReader`] are the streaming forms used by the
//! entry stream engine so that large entries never sit in memory at once.

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{self, Read, Write};

use crate::error::{Result, ZipError};

use super::structures::CompressionMethod;

/// Balanced deflate level used when the caller does not pick one.
pub const DEFAULT_LEVEL: u32 = 6;

/// Upper bound on up-front allocation; sizes come from untrusted headers.
const MAX_PREALLOC: usize = 1 << 20;

/// Map a 0-9 level onto flate2's setting.
pub fn compression_level(level: u32) -> Result<Compression> {
    if level > 9 {
        return Err(ZipError::InvalidArgument(format!(
            "compression level must be between 0 and 9, got {}",
            level
        )));
    }
    Ok(Compression::new(level))
}

/// Compress a buffer.
///
/// Returns the payload together with the method actually used: deflate output that is
/// not smaller than the input is discarded and the data is stored instead.
pub fn compress(
    data: &[u8],
    method: CompressionMethod,
    level: u32,
) -> Result<(Vec<u8>, CompressionMethod)> {
    match method {
        CompressionMethod::Stored => Ok((data.to_vec(), CompressionMethod::Stored)),
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(
                Vec::with_capacity(data.len() / 2),
                compression_level(level)?,
            );
            encoder.write_all(data)?;
            let compressed = encoder.finish()?;
            if compressed.len() >= data.len() {
                Ok((data.to_vec(), CompressionMethod::Stored))
            } else {
                Ok((compressed, CompressionMethod::Deflate))
            }
        }
        CompressionMethod::Unknown(m) => Err(ZipError::InvalidArgument(format!(
            "cannot compress with method {}",
            m
        ))),
    }
}

/// Decompress a buffer that must expand to exactly `expected_size` bytes.
pub fn decompress(
    data: &[u8],
    method: CompressionMethod,
    expected_size: u64,
    name: &str,
) -> Result<Vec<u8>> {
    let capacity = usize::try_from(expected_size).map_err(|_| ZipError::CorruptData {
        name: name.to_string(),
        reason: format!("entry of {} bytes does not fit in memory", expected_size),
    })?;
    let mut reader = CodecReader::new(data, method, name)?;
    let mut out = Vec::with_capacity(capacity.min(MAX_PREALLOC));
    // Read one byte past the expected size so oversized streams are noticed.
    (&mut reader)
        .take(expected_size + 1)
        .read_to_end(&mut out)
        .map_err(ZipError::from)?;

    if out.len() as u64 > expected_size {
        return Err(ZipError::CorruptData {
            name: name.to_string(),
            reason: format!("data expands past the expected {} bytes", expected_size),
        });
    }
    if (out.len() as u64) < expected_size {
        return Err(ZipError::CorruptData {
            name: name.to_string(),
            reason: format!(
                "expected {} bytes after decompression, got {}",
                expected_size,
                out.len()
            ),
        });
    }
    Ok(out)
}

/// Streaming encoder over an output sink.
pub enum CodecWriter<W: Write> {
    Stored(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> CodecWriter<W> {
    pub fn new(inner: W, method: CompressionMethod, level: u32) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(CodecWriter::Stored(inner)),
            CompressionMethod::Deflate => Ok(CodecWriter::Deflate(DeflateEncoder::new(
                inner,
                compression_level(level)?,
            ))),
            CompressionMethod::Unknown(m) => Err(ZipError::InvalidArgument(format!(
                "cannot compress with method {}",
                m
            ))),
        }
    }

    /// Flush any buffered compressed output and hand back the sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CodecWriter::Stored(w) => Ok(w),
            CodecWriter::Deflate(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for CodecWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CodecWriter::Stored(w) => w.write(buf),
            CodecWriter::Deflate(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWriter::Stored(w) => w.flush(),
            CodecWriter::Deflate(encoder) => encoder.flush(),
        }
    }
}

/// Streaming decoder over compressed input.
///
/// Malformed deflate data surfaces as [`ZipError::CorruptData`] carried inside the
/// returned `io::Error`.
pub struct CodecReader<R: Read> {
    inner: CodecReaderInner<R>,
    name: String,
}

enum CodecReaderInner<R: Read> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
}

impl<R: Read> CodecReader<R> {
    pub fn new(inner: R, method: CompressionMethod, name: &str) -> Result<Self> {
        let inner = match method {
            CompressionMethod::Stored => CodecReaderInner::Stored(inner),
            CompressionMethod::Deflate => CodecReaderInner::Deflate(DeflateDecoder::new(inner)),
            CompressionMethod::Unknown(m) => {
                return Err(ZipError::UnsupportedMethod {
                    name: name.to_string(),
                    method: m,
                });
            }
        };
        Ok(Self {
            inner,
            name: name.to_string(),
        })
    }
}

impl<R: Read> Read for CodecReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            CodecReaderInner::Stored(r) => r.read(buf),
            CodecReaderInner::Deflate(decoder) => decoder.read(buf).map_err(|e| {
                // flate2 reports bad bitstreams as InvalidInput/InvalidData
                if matches!(
                    e.kind(),
                    io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData
                ) && e.get_ref().is_none_or(|inner| !inner.is::<ZipError>())
                {
                    ZipError::CorruptData {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }
                    .into_io()
                } else {
                    e
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn deflate_shrinks_repetitive_data() {
        let data = b"abcabcabc".repeat(1000);
        let (compressed, method) =
            compress(&data, CompressionMethod::Deflate, DEFAULT_LEVEL).unwrap();
        assert_eq!(method, CompressionMethod::Deflate);
        assert!(compressed.len() < data.len() / 10);
        let back = decompress(&compressed, method, data.len() as u64, "t").unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn incompressible_data_falls_back_to_store() {
        let (compressed, method) = compress(b"x", CompressionMethod::Deflate, 9).unwrap();
        assert_eq!(method, CompressionMethod::Stored);
        assert_eq!(compressed, b"x");
    }

    #[test]
    fn compression_is_deterministic() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(64);
        let a = compress(&data, CompressionMethod::Deflate, 6).unwrap();
        let b = compress(&data, CompressionMethod::Deflate, 6).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn size_mismatch_is_corrupt() {
        let data = b"hello hello hello hello hello".to_vec();
        let (compressed, method) = compress(&data, CompressionMethod::Deflate, 6).unwrap();
        let err = decompress(&compressed, method, data.len() as u64 + 1, "t").unwrap_err();
        assert!(matches!(err, ZipError::CorruptData { .. }));
        let err = decompress(&compressed, method, data.len() as u64 - 1, "t").unwrap_err();
        assert!(matches!(err, ZipError::CorruptData { .. }));
    }

    #[test]
    fn garbage_bitstream_is_corrupt() {
        // Block type 3 is reserved in deflate.
        let err = decompress(&[0xff, 0xff, 0xff, 0xff], CompressionMethod::Deflate, 10, "t")
            .unwrap_err();
        assert!(err.is_integrity_error(), "{err:?}");
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let err = decompress(b"", CompressionMethod::Unknown(12), 0, "bz").unwrap_err();
        assert!(matches!(err, ZipError::UnsupportedMethod { method: 12, .. }));
    }

    #[test]
    fn level_out_of_range() {
        assert!(matches!(
            compression_level(10),
            Err(ZipError::InvalidArgument(_))
        ));
    }

    #[test]
    fn streaming_writer_matches_buffer_api() {
        let data = b"stream me ".repeat(500);
        let mut writer = CodecWriter::new(Vec::new(), CompressionMethod::Deflate, 6).unwrap();
        writer.write_all(&data).unwrap();
        let streamed = writer.finish().unwrap();
        let (buffered, _) = compress(&data, CompressionMethod::Deflate, 6).unwrap();
        assert_eq!(streamed, buffered);
    }

    proptest! {
        #[test]
        fn round_trip_for_random_buffers(
            data in prop::collection::vec(any::<u8>(), 0..4096),
            deflate in any::<bool>(),
            level in 0u32..=9,
        ) {
            let method = if deflate { CompressionMethod::Deflate } else { CompressionMethod::Stored };
            let (compressed, used) = compress(&data, method, level).unwrap();
            let back = decompress(&compressed, used, data.len() as u64, "p").unwrap();
            prop_assert_eq!(back, data);
        }
    }
}
