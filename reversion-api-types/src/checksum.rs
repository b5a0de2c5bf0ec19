use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// Number of bytes in a SHA-256 digest.
pub const CHECKSUM_SIZE: usize = 32;

/// A 256-bit SHA-256 digest, used to address blocks and to record a
/// version's whole-content checksum.
///
/// Equality and ordering are by content; the hex encoding is the canonical
/// textual and on-disk representation (block file names, `manifest.db` rows).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(#[serde(with = "hex::serde")] [u8; CHECKSUM_SIZE]);

impl Checksum {
    pub fn new(digest: [u8; CHECKSUM_SIZE]) -> Self {
        Self(digest)
    }

    /// Compute the SHA-256 checksum of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(openssl::sha::sha256(data))
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s)?;
        if bytes.len() != CHECKSUM_SIZE {
            bail!("expected a {}-byte hex digest, got {} bytes", CHECKSUM_SIZE, bytes.len());
        }
        let mut digest = [0u8; CHECKSUM_SIZE];
        digest.copy_from_slice(&bytes);
        Ok(Self(digest))
    }
}

impl AsRef<[u8]> for Checksum {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[test]
fn sha256_of_abc() {
    let checksum = Checksum::of(b"abc");
    assert_eq!(
        checksum.to_hex(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn hex_roundtrip() {
    let checksum = Checksum::of(b"round trip me");
    let text = checksum.to_hex();
    let parsed: Checksum = text.parse().unwrap();
    assert_eq!(checksum, parsed);
}

#[test]
fn rejects_wrong_length() {
    assert!("deadbeef".parse::<Checksum>().is_err());
}
