use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T, E = UpdateError> = std::result::Result<T, E>;

/// Everything that can stop an update attempt
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A request could not complete or returned a non-success status
    #[error("network error while {action}: {reason}")]
    Network {
        action: &'static str,
        reason: String,
    },

    /// A response body was not valid JSON or lacked a required field
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    /// A response field had an unexpected JSON type
    #[error("unexpected type in {what}: {reason}")]
    Type { what: &'static str, reason: String },

    /// No release asset matches the running platform
    #[error("no release asset found for {os}/{arch}")]
    AssetNotFound { os: String, arch: String },

    /// The artifact is too short to carry a format signature
    #[error("artifact {name} is {len} bytes, too short to identify")]
    MalformedArtifact { name: String, len: usize },

    /// The artifact is neither gzip+tar nor zip
    #[error("no supported archive format found in {name}:\n{dump}")]
    UnsupportedFormat { name: String, dump: String },

    /// The archive opened fine but its contents could not be read
    #[error("failed to read archive {name}: {reason}")]
    Archive { name: String, reason: String },

    /// The archive holds no entry with the expected binary name
    #[error("binary '{entry}' not found in {name}")]
    BinaryNotFound { name: String, entry: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("signature does not verify for checksum {digest}")]
    SignatureInvalid { digest: String },

    /// The configured public key is not a P-256 key in PEM form
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("permission denied writing {path}: {source}")]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Disk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("self-update is not supported on {0}")]
    PlatformUnsupported(&'static str),

    /// A release tag or the running version is not a semantic version
    #[error("invalid version '{version}': {reason}")]
    Version { version: String, reason: String },
}

impl UpdateError {
    /// Map a filesystem error on `path` to `Permission` or `Disk`
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            UpdateError::Permission {
                path: path.to_path_buf(),
                source,
            }
        } else {
            UpdateError::Disk {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub(crate) fn network(action: &'static str, err: impl fmt::Display) -> Self {
        UpdateError::Network {
            action,
            reason: err.to_string(),
        }
    }
}

/// Pipeline states; `Done` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    ResolvingRelease,
    LocatingAsset,
    Downloading,
    Extracting,
    Verifying,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateState::Idle => "idle",
            UpdateState::ResolvingRelease => "resolving release",
            UpdateState::LocatingAsset => "locating asset",
            UpdateState::Downloading => "downloading",
            UpdateState::Extracting => "extracting",
            UpdateState::Verifying => "verifying",
            UpdateState::Applying => "applying",
            UpdateState::Done => "done",
            UpdateState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// The first stage that failed, and why
#[derive(Debug, Error)]
#[error("update failed while {stage}: {error}")]
pub struct StageFailure {
    pub stage: UpdateState,
    #[source]
    pub error: UpdateError,
}
