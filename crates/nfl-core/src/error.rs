use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the rule model and the transaction layer
#[derive(Debug, Error)]
pub enum Error {
    /// A rule or chain is not linked to a registered chain/table
    #[error("incomplete reference: {0}")]
    IncompleteReference(String),

    /// Replace and delete need the kernel handle of an existing rule
    #[error("rule in chain '{chain}' has no handle")]
    MissingHandle { chain: String },

    /// Hook, type and policy do not form a combination the kernel accepts
    #[error("invalid chain '{chain}': {reason}")]
    InvalidChain { chain: String, reason: String },

    #[error("unknown table family {0}")]
    UnknownFamily(u8),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The kernel rejected the batch; the local queue has already been cleared
    #[error("commit failed: {0}")]
    Commit(#[source] TransportError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A typed expression that cannot be lowered to primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot encode expression {position}: {reason}")]
pub struct EncodeError {
    pub position: usize,
    pub reason: String,
}

/// A primitive sequence that does not map back to typed expressions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot decode primitive {position}: {reason}")]
pub struct DecodeError {
    pub position: usize,
    pub reason: String,
}

impl EncodeError {
    pub fn new(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

impl DecodeError {
    pub fn new(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

/// Failures reported by a [`crate::Transport`]
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation `op` of the batch was refused, nothing was applied
    #[error("operation {op} rejected: {reason}")]
    Rejected { op: usize, reason: String },

    #[error("no such {kind}: {name}")]
    NoSuchObject { kind: &'static str, name: String },

    #[error("nft exited with {status}: {stderr}")]
    Command { status: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported: {0}")]
    Unsupported(String),
}
