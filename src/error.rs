//! Error taxonomy for sessions.
//!
//! Configuration errors (missing directory, unknown chain, missing
//! executable) are raised before any process is launched. Process errors
//! surface as [`SessionError::NodeUnavailable`] once the supervisor sees the
//! node is gone. Generator failures abort the remaining pipeline.

use crate::node::binary::BinaryError;
use crate::rpc::RpcError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("The node directory does not exist: {path}")]
    Directory { path: PathBuf },

    #[error(transparent)]
    UnsupportedChain(#[from] crate::chain::UnsupportedChainError),

    #[error("Node executable unusable: {0}")]
    Executable(#[from] BinaryError),

    #[error("Failed to launch node {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Clock(#[from] crate::clock::ClockOverflow),

    #[error("Node unavailable: {reason}")]
    NodeUnavailable { reason: String },

    #[error("RPC failure: {0}")]
    Rpc(#[from] RpcError),

    #[error("Generator {name} failed: {source}")]
    Generator {
        name: String,
        #[source]
        source: Box<SessionError>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize outputs: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Free-form failure raised by a generator's own logic.
    #[error("{0}")]
    Plugin(String),
}

impl SessionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for the process-death condition, looking through generator wrapping.
    pub fn is_node_unavailable(&self) -> bool {
        match self {
            SessionError::NodeUnavailable { .. } => true,
            SessionError::Generator { source, .. } => source.is_node_unavailable(),
            _ => false,
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
