//! Synthetic file generator for stress and integration tests.
//!
//! Output is streamed in fixed-size chunks, so multi-gigabyte files never need to
//! fit in memory. Every fill policy is deterministic.

use log::info;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, ZipError};

const CHUNK_SIZE: usize = 64 * 1024;

/// What to fill a generated file with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FillPolicy {
    #[default]
    Zeros,
    /// The given bytes repeated end to end.
    Pattern(Vec<u8>),
    /// Pseudo-random bytes from a seeded generator.
    Random { seed: u64 },
}

/// Produces successive chunks of generated content.
enum Filler {
    Zeros,
    Pattern { pattern: Vec<u8>, phase: usize },
    Random(Box<StdRng>),
}

impl Filler {
    fn new(policy: &FillPolicy) -> Result<Self> {
        Ok(match policy {
            FillPolicy::Zeros => Filler::Zeros,
            FillPolicy::Pattern(pattern) => {
                if pattern.is_empty() {
                    return Err(ZipError::InvalidArgument(
                        "fill pattern must not be empty".into(),
                    ));
                }
                Filler::Pattern {
                    pattern: pattern.clone(),
                    phase: 0,
                }
            }
            FillPolicy::Random { seed } => Filler::Random(Box::new(StdRng::seed_from_u64(*seed))),
        })
    }

    fn fill(&mut self, buf: &mut [u8]) {
        match self {
            Filler::Zeros => buf.fill(0),
            Filler::Pattern { pattern, phase } => {
                for byte in buf.iter_mut() {
                    *byte = pattern[*phase];
                    *phase = (*phase + 1) % pattern.len();
                }
            }
            Filler::Random(rng) => rng.fill_bytes(buf),
        }
    }
}

/// Write exactly `size` bytes of generated content to `path`, replacing any existing file.
pub fn generate(path: &Path, size: u64, fill: &FillPolicy) -> Result<()> {
    let mut filler = Filler::new(fill)?;
    let mut file = File::create(path)?;
    let mut buf = vec![0u8; CHUNK_SIZE.min(size as usize)];
    let mut remaining = size;

    while remaining > 0 {
        let n = (remaining as usize).min(buf.len());
        filler.fill(&mut buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    file.sync_all()?;

    info!("generated {} ({} bytes, {})", path.display(), size, fill_name(fill));
    Ok(())
}

/// Zero-filled file of `megabytes` MiB.
pub fn generate_mb(path: &Path, megabytes: u64) -> Result<()> {
    let size = megabytes.checked_mul(1024 * 1024).ok_or_else(|| {
        ZipError::InvalidArgument(format!("{} MiB is too large", megabytes))
    })?;
    generate(path, size, &FillPolicy::Zeros)
}

fn fill_name(fill: &FillPolicy) -> &'static str {
    match fill {
        FillPolicy::Zeros => "zeros",
        FillPolicy::Pattern(_) => "pattern",
        FillPolicy::Random { .. } => "random",
    }
}

/// Parse a size such as `1048576`, `512K`, `10M` or `5G` (binary multiples).
pub fn parse_size(text: &str) -> Result<u64> {
    let text = text.trim();
    let (digits, multiplier) = match text.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let multiplier: u64 = match c.to_ascii_uppercase() {
                'B' => 1,
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                'T' => 1 << 40,
                _ => {
                    return Err(ZipError::InvalidArgument(format!(
                        "unknown size suffix in '{}'",
                        text
                    )));
                }
            };
            (&text[..i], multiplier)
        }
        _ => (text, 1),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| ZipError::InvalidArgument(format!("invalid size '{}'", text)))
}
