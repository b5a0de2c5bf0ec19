//! Splitting a byte stream into an ordered sequence of chunks.
//!
//! Two strategies are provided: [`Chunker::FixedSize`] cuts every `size`
//! bytes, and [`Chunker::ContentDefined`] is a rolling-hash scheme (in the
//! style of ZPAQ's fragment splitter) that cuts at content-dependent
//! boundaries so that inserting or deleting bytes in the middle of a file
//! only disturbs the chunks near the edit. Both must reproduce the exact
//! same boundary positions on every platform, since deduplication across
//! a repository depends on it.

use std::io::Read;

use anyhow::{bail, Error};
use reversion_api_types::ChunkingMode;

/// Multiplier for the content-defined rolling hash. Arbitrary but fixed.
const HM: u32 = 123_456_791;

/// A strategy for cutting a byte stream into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunker {
    /// Chunks of exactly `size` bytes, except possibly the last.
    FixedSize { size: usize },
    /// Rolling-hash content-defined chunking. `bits` controls the average
    /// chunk size: a boundary is declared when the hash falls below `1 <<
    /// (32 - bits)`, so the expected run length before a cut is `2^bits`.
    ContentDefined { bits: u32 },
}

impl From<ChunkingMode> for Chunker {
    fn from(mode: ChunkingMode) -> Self {
        match mode {
            ChunkingMode::ContentDefined { bits } => Chunker::ContentDefined { bits },
            ChunkingMode::FixedSize { size } => Chunker::FixedSize { size },
        }
    }
}

impl Chunker {
    /// Read all of `reader` and split it into chunks. Concatenating the
    /// returned chunks in order reproduces the input exactly.
    pub fn chunk(&self, mut reader: impl Read) -> Result<Vec<Vec<u8>>, Error> {
        match *self {
            Chunker::FixedSize { size } => {
                if size == 0 {
                    bail!("fixed chunk size must be greater than zero");
                }
                fixed_size_chunks(&mut reader, size)
            }
            Chunker::ContentDefined { bits } => {
                if !(1..=31).contains(&bits) {
                    bail!("content-defined chunker bits must be in 1..=31, got {bits}");
                }
                content_defined_chunks(&mut reader, bits)
            }
        }
    }
}

fn fixed_size_chunks(reader: &mut impl Read, size: usize) -> Result<Vec<Vec<u8>>, Error> {
    let mut chunks = Vec::new();
    let mut buf = vec![0u8; size];
    loop {
        let mut filled = 0;
        while filled < size {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        chunks.push(buf[..filled].to_vec());
        if filled < size {
            break;
        }
    }
    Ok(chunks)
}

/// State for the ZPAQ-like rolling hash, reset at every chunk boundary.
struct RollingHash {
    h: u32,
    c1: u8,
    o1: [u8; 256],
}

impl RollingHash {
    fn new() -> Self {
        RollingHash {
            h: 0,
            c1: 0,
            o1: [0u8; 256],
        }
    }

    /// Feed one byte, updating the hash and the order-1 prediction table.
    fn push(&mut self, b: u8) {
        let predicted = self.o1[self.c1 as usize];
        self.h = if b == predicted {
            self.h.wrapping_mul(HM).wrapping_add(b as u32 + 1)
        } else {
            self.h
                .wrapping_mul(HM)
                .wrapping_mul(2)
                .wrapping_add(b as u32 + 1)
        };
        self.o1[self.c1 as usize] = b;
        self.c1 = b;
    }
}

fn content_defined_chunks(reader: &mut impl Read, bits: u32) -> Result<Vec<Vec<u8>>, Error> {
    let threshold = 1u32 << (32 - bits);

    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut hash = RollingHash::new();

    for &b in &data {
        hash.push(b);
        current.push(b);
        if hash.h < threshold {
            chunks.push(std::mem::take(&mut current));
            hash = RollingHash::new();
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reversion_api_types::Checksum;

    fn hex(data: &[u8]) -> String {
        Checksum::of(data).to_hex()
    }

    #[test]
    fn fixed_size_chunking_yields_expected_checksums() {
        let chunker = Chunker::FixedSize { size: 2 };
        let chunks = chunker.chunk("abcdefg".as_bytes()).unwrap();
        assert_eq!(
            chunks,
            vec![
                b"ab".to_vec(),
                b"cd".to_vec(),
                b"ef".to_vec(),
                b"g".to_vec(),
            ]
        );
        assert!(hex(&chunks[0]).starts_with("fb8e20fc"));
        assert!(hex(&chunks[1]).starts_with("21e721c3"));
        assert!(hex(&chunks[2]).starts_with("4ca669ac"));
        assert!(hex(&chunks[3]).starts_with("cd0aa985"));

        let whole: Vec<u8> = chunks.concat();
        assert_eq!(whole, b"abcdefg");
        assert!(hex(&whole).starts_with("7d1a5412"));
    }

    #[test]
    fn fixed_size_chunks_reassemble_to_original() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let chunks = Chunker::FixedSize { size: 777 }.chunk(&data[..]).unwrap();
        assert_eq!(chunks.concat(), data);
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.len(), 777);
        }
    }

    #[test]
    fn content_defined_chunks_reassemble_to_original() {
        let data: Vec<u8> = (0..200_000u32).map(|i| ((i * 2654435761) % 256) as u8).collect();
        let chunks = Chunker::ContentDefined { bits: 13 }.chunk(&data[..]).unwrap();
        assert_eq!(chunks.concat(), data);
        assert!(chunks.len() > 1, "expected more than one chunk for 200KiB of varied data");
    }

    #[test]
    fn content_defined_boundaries_are_insensitive_to_distant_edits() {
        let mut data: Vec<u8> = (0..100_000u32).map(|i| ((i * 97) % 256) as u8).collect();
        let original = Chunker::ContentDefined { bits: 12 }.chunk(&data[..]).unwrap();

        // Edit deep into the tail; chunks before the edit point must be unchanged.
        data[90_000] ^= 0xff;
        let edited = Chunker::ContentDefined { bits: 12 }.chunk(&data[..]).unwrap();

        assert_eq!(original[0], edited[0]);
    }

    #[test]
    fn rejects_non_power_compatible_bits() {
        assert!(Chunker::ContentDefined { bits: 0 }.chunk(&b""[..]).is_err());
        assert!(Chunker::ContentDefined { bits: 32 }.chunk(&b""[..]).is_err());
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(Chunker::FixedSize { size: 4 }.chunk(&b""[..]).unwrap().is_empty());
        assert!(Chunker::ContentDefined { bits: 10 }.chunk(&b""[..]).unwrap().is_empty());
    }
}
