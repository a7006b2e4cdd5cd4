use std::io;

/// Errors from cryptographic primitives (key agreement, AEAD).
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("HKDF expand failed: invalid length")]
    HkdfExpandFailed,

    #[error("AEAD encryption failed")]
    SealFailed,

    #[error("JSON encoding failed: {0}")]
    Encode(String),

    #[error("non-contributory key exchange: peer sent small-subgroup or identity point")]
    NonContributoryKey,
}

/// Errors from the handshake and the sealed-envelope transport.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("authentication failed: envelope is invalid or tampered")]
    AuthenticationFailed,

    #[error("malformed message: {0}")]
    DecodeError(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors from claim-token authorization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("claim token does not match")]
    InvalidToken,

    #[error("deadline {deadline_ts} has passed (now {now})")]
    ExpiredDeadline { deadline_ts: i64, now: i64 },
}

impl AuthError {
    /// Stable machine-readable code carried in rejection results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "MISSING_FIELD",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::ExpiredDeadline { .. } => "EXPIRED_DEADLINE",
        }
    }
}

/// Errors raised inside the job sandbox. All of them are terminal for the job and
/// end up in the attempt's persisted result.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("path escapes jail root: {0}")]
    PathEscape(String),

    #[error("symbolic link rejected: {0}")]
    SymlinkRejected(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("unknown job kind: {0}")]
    UnknownKind(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SandboxError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathEscape(_) => "PATH_ESCAPE",
            Self::SymlinkRejected(_) => "SYMLINK_REJECTED",
            Self::NotADirectory(_) => "NOT_A_DIRECTORY",
            Self::InvalidArgs(_) => "INVALID_ARGS",
            Self::UnknownKind(_) => "UNKNOWN_KIND",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Errors from the persistent stores (attempt ledger, trust store, key records).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from decoding a job request body.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("malformed job request: {0}")]
    Malformed(String),

    #[error("unsupported request version: {0}")]
    UnsupportedVersion(u64),
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
