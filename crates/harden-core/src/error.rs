//! Error types for harden-core

use std::path::PathBuf;

use crate::model::Mechanism;

/// Result type for harden-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in harden-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A locator string could not be canonicalized
    #[error("Invalid locator '{raw}': {reason}")]
    InvalidLocator { raw: String, reason: String },

    /// A change assertion failed validation
    #[error("Invalid change '{id}': {reason}")]
    InvalidChange { id: String, reason: String },

    /// The change set document could not be loaded
    #[error("Invalid change set at {path}: {message}")]
    InvalidChangeSet { path: PathBuf, message: String },

    /// The locator kind does not fit the mechanism handling it
    #[error("{mechanism} cannot address locator {locator}")]
    LocatorMismatch {
        mechanism: Mechanism,
        locator: String,
    },

    /// The configuration surface cannot be reached at all
    #[error("Surface unavailable: {surface}: {reason}")]
    SurfaceUnavailable { surface: String, reason: String },

    /// The configuration surface does not exist (yet)
    #[error("Surface does not exist: {surface}")]
    SurfaceMissing { surface: String },

    /// The value cannot be stored in the requested native representation
    #[error("Unsupported value for {mechanism}: {reason}")]
    UnsupportedValue {
        mechanism: Mechanism,
        reason: String,
    },

    /// A host tool exited unsuccessfully
    #[error("{program} failed (exit code {code}): {stderr}")]
    ToolFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    /// A surface document could not be parsed
    #[error("Failed to parse {format} at {path}: {message}")]
    Parse {
        format: String,
        path: PathBuf,
        message: String,
    },

    /// A manifest or one of its artifacts is unreadable or inconsistent
    #[error("Manifest corrupt: {message}")]
    ManifestCorrupt { message: String },

    /// The manifest declares a schema this build does not understand
    #[error("Unsupported manifest version {found} (newest known is {supported})")]
    ManifestVersion { found: u32, supported: u32 },

    /// The operation needs live host access but adapters only render
    #[error("{operation} is not available in render mode")]
    RenderOnly { operation: String },

    /// The run was stopped because backups were incomplete
    #[error(
        "Run aborted: {failed} surface backup(s) failed and abort-on-backup-failure is set (manifest: {manifest})"
    )]
    BackupAborted { failed: usize, manifest: PathBuf },

    /// Configuration file could not be parsed
    #[error("Invalid configuration at {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Filesystem error from harden-fs
    #[error(transparent)]
    Fs(#[from] harden_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn unavailable(surface: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SurfaceUnavailable {
            surface: surface.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(
        format: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            format: format.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}
