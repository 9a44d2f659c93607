//! Error types for the Storage Pool Manager
//!
//! Provides structured error types for pool validation, lifecycle
//! orchestration, external system commands and configuration loading.

use crate::pool::mount_options::allowed_option_list;
use crate::pool::raid::supported_level_list;
use thiserror::Error;

/// Unified error type for the pool manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Name / Raid Validation Errors
    // =========================================================================
    #[error(
        "Pool name must start with a alphanumeric(a-z0-9) character and can be followed by \
         any of the following characters: letter(a-z), digits(0-9), hyphen(-), underscore(_) \
         or a period(.)."
    )]
    InvalidName { name: String },

    #[error("Unsupported raid level({level}). use one of: {}", supported_level_list())]
    InvalidRaidLevel { level: String },

    #[error("At least {min_disks} disks are required for the raid level: {level}")]
    InsufficientDisks { level: String, min_disks: usize },

    #[error("Even number of drives are required for the raid level: {level}")]
    OddDiskCount { level: String },

    #[error("raid10 requires an even number of drives. Total provided = {count}")]
    UnevenDiskCount { count: usize },

    // =========================================================================
    // Compression / Mount Option Errors
    // =========================================================================
    #[error("Unsupported compression algorithm({value}). Use one of ('lzo', 'zlib', 'no')")]
    InvalidCompression { value: String },

    #[error(
        "mount option({option}) not allowed. Make sure there are no whitespaces in the input. \
         Allowed options: {}",
        allowed_option_list()
    )]
    InvalidMountOption { option: String },

    #[error("Value for mount option({option}) must be an integer")]
    MissingOptionValue { option: String },

    #[error("Value for mount option({option}) must be an integer")]
    InvalidOptionValue { option: String },

    #[error("Mount option({option}) does not take a value")]
    UnexpectedOptionValue { option: String },

    #[error("compress-force is only allowed with ('lzo', 'zlib', 'no')")]
    InvalidCompressForce { value: String },

    // =========================================================================
    // Disk Errors
    // =========================================================================
    #[error("At least one disk must be specified")]
    NoDisksSpecified,

    #[error("Disk({disk}) does not exist")]
    DiskNotFound { disk: String },

    #[error("Disk({disk}) is specified more than once")]
    DuplicateDisk { disk: String },

    #[error("Disk({disk}) already belongs to Pool({pool})")]
    DiskInUse { disk: String, pool: String },

    #[error("Disk({disk}) is not a member of Pool({pool})")]
    DiskNotInPool { disk: String, pool: String },

    // =========================================================================
    // Pool State Errors
    // =========================================================================
    #[error("Pool({name}) does not exist")]
    PoolNotFound { name: String },

    #[error("Pool({name}) already exists. Choose a different name")]
    DuplicatePool { name: String },

    #[error(
        "Edit operations are not allowed on this Pool({name}) as it contains the operating system."
    )]
    RootPoolProtected { name: String },

    #[error(
        "A Balance process is already running for this pool({name}). \
         Resize is not supported during a balance process."
    )]
    BalanceInProgress { name: String },

    #[error("Disks cannot be removed from a pool with this raid({level}) configuration")]
    RemovalNotSupported { level: String },

    #[error(
        "Only {batch} disk(s) can be removed at once from this pool because of its raid \
         configuration({level}). Total provided = {got}"
    )]
    WrongRemovalBatchSize {
        level: String,
        batch: usize,
        got: usize,
    },

    #[error(
        "Removing disks would leave {remaining} disk(s) in the pool, but at least {min_disks} \
         are required for the raid level: {level}"
    )]
    InsufficientDisksRemaining {
        level: String,
        min_disks: usize,
        remaining: usize,
    },

    // =========================================================================
    // External Command Errors
    // =========================================================================
    /// The collaborator's message is passed through verbatim.
    #[error("{message}")]
    ExternalCommand { operation: String, message: String },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by callers to map failures to outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input; never touches external state
    Validation,
    /// Unknown pool or disk
    NotFound,
    /// Request conflicts with current pool state
    Conflict,
    /// The external collaborator failed
    ExternalCommand,
    /// Configuration, parsing and IO failures
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::ExternalCommand => write!(f, "external_command"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidName { .. }
            | Error::InvalidRaidLevel { .. }
            | Error::InsufficientDisks { .. }
            | Error::OddDiskCount { .. }
            | Error::UnevenDiskCount { .. }
            | Error::InvalidCompression { .. }
            | Error::InvalidMountOption { .. }
            | Error::MissingOptionValue { .. }
            | Error::InvalidOptionValue { .. }
            | Error::UnexpectedOptionValue { .. }
            | Error::InvalidCompressForce { .. }
            | Error::NoDisksSpecified
            | Error::DuplicateDisk { .. }
            | Error::RemovalNotSupported { .. }
            | Error::InsufficientDisksRemaining { .. } => ErrorKind::Validation,

            Error::PoolNotFound { .. } | Error::DiskNotFound { .. } => ErrorKind::NotFound,

            Error::DuplicatePool { .. }
            | Error::DiskInUse { .. }
            | Error::DiskNotInPool { .. }
            | Error::RootPoolProtected { .. }
            | Error::BalanceInProgress { .. }
            | Error::WrongRemovalBatchSize { .. } => ErrorKind::Conflict,

            Error::ExternalCommand { .. } => ErrorKind::ExternalCommand,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Wrap a collaborator failure without altering its message
    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ExternalCommand {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error left external state untouched
    pub fn is_validation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation)
    }
}

/// Result type alias for the pool manager
pub type Result<T> = std::result::Result<T, Error>;
