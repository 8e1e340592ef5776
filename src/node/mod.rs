//! Node process supervision.
//!
//! This module launches the node executable against a data directory,
//! waits for its RPC port, and guarantees the process is stopped when the
//! owning [`NodeHandle`] goes out of scope.

pub mod binary;
pub mod supervisor;

pub use binary::{locate_executable, BinaryError};
pub use supervisor::{launch_args, write_config_file, NodeHandle, NodeLaunch, NodeSupervisor};

use crate::error::SessionError;

/// Anything that can tell whether the node behind a session is still running.
pub trait Liveness {
    /// `Err(SessionError::NodeUnavailable)` once the node process is gone.
    fn ensure_alive(&mut self) -> Result<(), SessionError>;
}
