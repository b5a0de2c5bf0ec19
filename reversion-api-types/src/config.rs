use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReversionError;

/// A value type a [`ConfigProperty`] can hold.
///
/// Parsing failures carry a human-readable reason; [`ConfigProperty::parse`]
/// wraps it into a [`ReversionError::ValueConvert`] that names the property
/// and the offending text.
pub trait PropertyValue: Sized + Clone + fmt::Debug {
    fn parse_text(text: &str) -> Result<Self, String>;
    fn to_text(&self) -> String;
}

impl PropertyValue for i64 {
    fn parse_text(text: &str) -> Result<Self, String> {
        text.trim()
            .parse::<i64>()
            .map_err(|err| format!("not a valid integer: {err}"))
    }

    fn to_text(&self) -> String {
        self.to_string()
    }
}

impl PropertyValue for bool {
    fn parse_text(text: &str) -> Result<Self, String> {
        match text.trim() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(format!("not a valid boolean: {other:?}")),
        }
    }

    fn to_text(&self) -> String {
        self.to_string()
    }
}

impl PropertyValue for String {
    fn parse_text(text: &str) -> Result<Self, String> {
        Ok(text.to_owned())
    }

    fn to_text(&self) -> String {
        self.clone()
    }
}

/// A named configuration property with a typed default value.
///
/// Mirrors the "enumerated bag of named properties with typed defaults"
/// described for the repository configuration: a property knows how to turn
/// user-supplied text into its declared type, or fail with a
/// [`ReversionError::ValueConvert`] describing what went wrong.
#[derive(Debug, Clone)]
pub struct ConfigProperty<T: PropertyValue> {
    name: String,
    default: T,
}

impl<T: PropertyValue> ConfigProperty<T> {
    pub fn new(name: impl Into<String>, default: T) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Parse `text` into this property's type, or fail with a
    /// [`ReversionError::ValueConvert`] naming this property and the bad text.
    pub fn parse(&self, text: &str) -> Result<T, ReversionError> {
        T::parse_text(text)
            .map_err(|reason| ReversionError::value_convert(self.name.clone(), text, reason))
    }
}

fn default_hash_func() -> String {
    "SHA-256".to_owned()
}

/// `0` is the sentinel for "use content-defined chunking"; see
/// [`RepositoryConfig::chunking_mode`].
fn default_block_size() -> i64 {
    0
}

fn default_chunker_bits() -> u32 {
    20 // ~1 MiB average chunk size
}

/// Which chunker a repository was configured to use at commit time.
///
/// `spec.md` §9 flags the choice between fixed-size and content-defined
/// chunking at commit time as ambiguous in the source system; this
/// repository makes the choice explicit and total via `blockSize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkingMode {
    /// Content-defined chunking (rolling hash) with the given `bits` parameter.
    ContentDefined { bits: u32 },
    /// Fixed-size chunks of exactly `size` bytes (except possibly the last).
    FixedSize { size: usize },
}

/// The persisted `config.json` document: `{ hashFunc, blockSize, ... }`.
///
/// Unknown keys are preserved on read and rewritten on write, per `spec.md`
/// §4.3; this is modeled with `#[serde(flatten)]` into `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(rename = "hashFunc", default = "default_hash_func")]
    pub hash_func: String,

    #[serde(rename = "blockSize", default = "default_block_size")]
    pub block_size: i64,

    #[serde(rename = "chunkerBits", default = "default_chunker_bits")]
    pub chunker_bits: u32,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            hash_func: default_hash_func(),
            block_size: default_block_size(),
            chunker_bits: default_chunker_bits(),
            extra: Map::new(),
        }
    }
}

impl RepositoryConfig {
    /// Validate the document, failing closed on anything the chunker or
    /// block store cannot act on unambiguously.
    pub fn validate(&self) -> Result<(), ReversionError> {
        if self.hash_func != "SHA-256" {
            return Err(ReversionError::value_convert(
                "hashFunc",
                &self.hash_func,
                "only \"SHA-256\" is supported",
            ));
        }
        if self.block_size < 0 {
            return Err(ReversionError::value_convert(
                "blockSize",
                self.block_size.to_string(),
                "must not be negative",
            ));
        }
        if self.chunker_bits == 0 || self.chunker_bits > 31 {
            return Err(ReversionError::value_convert(
                "chunkerBits",
                self.chunker_bits.to_string(),
                "must be between 1 and 31",
            ));
        }
        Ok(())
    }

    /// The chunker this configuration selects at commit time. `blockSize ==
    /// 0` means "do not split on fixed boundaries, use content-defined
    /// chunking instead" (see `SPEC_FULL.md` §C).
    pub fn chunking_mode(&self) -> ChunkingMode {
        if self.block_size == 0 {
            ChunkingMode::ContentDefined {
                bits: self.chunker_bits,
            }
        } else {
            ChunkingMode::FixedSize {
                size: self.block_size as usize,
            }
        }
    }
}

#[test]
fn int_property_roundtrip() {
    let prop = ConfigProperty::new("test", 0i64);
    assert_eq!(prop.parse("100").unwrap(), 100);
    assert!(prop.parse("invalid value").is_err());
}

#[test]
fn config_roundtrips_unknown_keys() {
    let json = serde_json::json!({
        "hashFunc": "SHA-256",
        "blockSize": 0,
        "futureKey": "kept-as-is",
    });
    let cfg: RepositoryConfig = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(cfg.extra.get("futureKey").unwrap(), "kept-as-is");
    let back = serde_json::to_value(&cfg).unwrap();
    assert_eq!(back["futureKey"], "kept-as-is");
}

#[test]
fn zero_block_size_selects_content_defined() {
    let cfg = RepositoryConfig::default();
    assert_eq!(
        cfg.chunking_mode(),
        ChunkingMode::ContentDefined { bits: 20 }
    );
}
