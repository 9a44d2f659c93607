//! Mount-Option Grammar
//!
//! Parses and validates the comma-separated mount option string accepted
//! by create and remount. Every token is either a bare flag, an
//! integer-valued `key=value`, or `compress-force=<codec>`.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

// =============================================================================
// Compression
// =============================================================================

/// Compression codec applied at mount time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Lzo,
    Zlib,
    #[default]
    No,
}

impl Compression {
    pub const ALL: [Compression; 3] = [Compression::Lzo, Compression::Zlib, Compression::No];

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Lzo => "lzo",
            Compression::Zlib => "zlib",
            Compression::No => "no",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Compression::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidCompression {
                value: s.to_string(),
            })
    }
}

// =============================================================================
// Option Keys
// =============================================================================

/// Options that take no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagOption {
    FatalErrors,
    SsdSpread,
    ClearCache,
    InodeCache,
    NoDataCow,
    NoAtime,
    NoDataSum,
    NoAcl,
    SpaceCache,
    Ssd,
    Discard,
    AutoDefrag,
    NoSpaceCache,
}

impl FlagOption {
    pub const ALL: [FlagOption; 13] = [
        FlagOption::FatalErrors,
        FlagOption::SsdSpread,
        FlagOption::ClearCache,
        FlagOption::InodeCache,
        FlagOption::NoDataCow,
        FlagOption::NoAtime,
        FlagOption::NoDataSum,
        FlagOption::NoAcl,
        FlagOption::SpaceCache,
        FlagOption::Ssd,
        FlagOption::Discard,
        FlagOption::AutoDefrag,
        FlagOption::NoSpaceCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlagOption::FatalErrors => "fatal_errors",
            FlagOption::SsdSpread => "ssd_spread",
            FlagOption::ClearCache => "clear_cache",
            FlagOption::InodeCache => "inode_cache",
            FlagOption::NoDataCow => "nodatacow",
            FlagOption::NoAtime => "noatime",
            FlagOption::NoDataSum => "nodatasum",
            FlagOption::NoAcl => "noacl",
            FlagOption::SpaceCache => "space_cache",
            FlagOption::Ssd => "ssd",
            FlagOption::Discard => "discard",
            FlagOption::AutoDefrag => "autodefrag",
            FlagOption::NoSpaceCache => "nospace_cache",
        }
    }

    fn lookup(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == key)
    }
}

/// Options whose value must be an integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegerOption {
    ThreadPool,
    MaxInline,
    AllocStart,
    Commit,
    MetadataRatio,
}

impl IntegerOption {
    pub const ALL: [IntegerOption; 5] = [
        IntegerOption::ThreadPool,
        IntegerOption::MaxInline,
        IntegerOption::AllocStart,
        IntegerOption::Commit,
        IntegerOption::MetadataRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntegerOption::ThreadPool => "thread_pool",
            IntegerOption::MaxInline => "max_inline",
            IntegerOption::AllocStart => "alloc_start",
            IntegerOption::Commit => "commit",
            IntegerOption::MetadataRatio => "metadata_ratio",
        }
    }

    fn lookup(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.as_str() == key)
    }
}

pub const COMPRESS_FORCE: &str = "compress-force";

/// Every accepted key formatted for error messages
pub fn allowed_option_list() -> String {
    let keys: Vec<String> = FlagOption::ALL
        .iter()
        .map(FlagOption::as_str)
        .chain(IntegerOption::ALL.iter().map(IntegerOption::as_str))
        .chain(std::iter::once(COMPRESS_FORCE))
        .map(|k| format!("'{}'", k))
        .collect();
    format!("[{}]", keys.join(", "))
}

// =============================================================================
// Parsed Options
// =============================================================================

/// A single validated mount option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOption {
    Flag(FlagOption),
    /// Value text as given; it is checked to be an integer but not rewritten
    Integer(IntegerOption, String),
    CompressForce(Compression),
}

impl MountOption {
    pub fn key(&self) -> &'static str {
        match self {
            MountOption::Flag(flag) => flag.as_str(),
            MountOption::Integer(opt, _) => opt.as_str(),
            MountOption::CompressForce(_) => COMPRESS_FORCE,
        }
    }

    /// Parse one `key` or `key=value` token
    pub fn parse_token(token: &str) -> Result<Self> {
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (token, None),
        };

        if let Some(flag) = FlagOption::lookup(key) {
            return match value {
                None => Ok(MountOption::Flag(flag)),
                Some(_) => Err(Error::UnexpectedOptionValue {
                    option: key.to_string(),
                }),
            };
        }

        if let Some(opt) = IntegerOption::lookup(key) {
            let value = value.ok_or_else(|| Error::MissingOptionValue {
                option: key.to_string(),
            })?;
            if !is_integer_literal(value) {
                return Err(Error::InvalidOptionValue {
                    option: key.to_string(),
                });
            }
            return Ok(MountOption::Integer(opt, value.to_string()));
        }

        if key == COMPRESS_FORCE {
            let value = value.unwrap_or_default();
            let codec = value
                .parse::<Compression>()
                .map_err(|_| Error::InvalidCompressForce {
                    value: value.to_string(),
                })?;
            return Ok(MountOption::CompressForce(codec));
        }

        Err(Error::InvalidMountOption {
            option: key.to_string(),
        })
    }
}

/// Integer in the form the original tooling accepts: surrounding whitespace,
/// an optional sign and digits with single `_` separators, of any magnitude.
fn is_integer_literal(value: &str) -> bool {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    !digits.is_empty()
        && !digits.starts_with('_')
        && !digits.ends_with('_')
        && !digits.contains("__")
        && digits.chars().all(|c| c.is_ascii_digit() || c == '_')
}

impl std::fmt::Display for MountOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountOption::Flag(flag) => write!(f, "{}", flag.as_str()),
            MountOption::Integer(opt, value) => write!(f, "{}={}", opt.as_str(), value),
            MountOption::CompressForce(codec) => write!(f, "{}={}", COMPRESS_FORCE, codec),
        }
    }
}

/// Ordered set of mount options keyed by option name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    entries: IndexMap<&'static str, MountOption>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a comma-separated option string.
    ///
    /// Empty tokens are skipped. A repeated key keeps its first position and
    /// takes the last value.
    pub fn parse(input: &str) -> Result<Self> {
        let mut entries = IndexMap::new();
        for token in input.split(',').filter(|t| !t.is_empty()) {
            let option = MountOption::parse_token(token)?;
            entries.insert(option.key(), option);
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&MountOption> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MountOption> {
        self.entries.values()
    }

    /// Option string passed to mount, with the pool compression appended
    /// unless a compress option is already present.
    pub fn effective(&self, compression: Compression) -> String {
        let mut options = self.to_string();
        if !options.contains("compress") {
            if !options.is_empty() {
                options.push(',');
            }
            options.push_str(&format!("compress={}", compression));
        }
        options
    }
}

impl std::fmt::Display for MountOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens: Vec<String> = self.entries.values().map(|o| o.to_string()).collect();
        write!(f, "{}", tokens.join(","))
    }
}

impl FromStr for MountOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MountOptions::parse(s)
    }
}

impl Serialize for MountOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MountOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MountOptions::parse(&raw).map_err(serde::de::Error::custom)
    }
}
