//! Node launch, readiness and teardown.
//!
//! ## Launch Sequence
//!
//! 1. Validate inputs: the data directory (if given) must exist and the
//!    executable must resolve. Nothing is launched on failure.
//! 2. Write the chain's config file into the data directory.
//! 3. Spawn the node with a fixed RPC port, `-reindex`, the injected
//!    mock-time and any chain-specific flags.
//! 4. Poll `getblockcount` until it answers, bounded by the settle timeout.
//!
//! ## Teardown
//!
//! [`NodeHandle::stop`] asks the node to shut down over RPC, waits up to the
//! shutdown timeout and kills it afterwards. It is idempotent and runs from
//! `Drop`, so a handle that goes out of scope on an error path still takes
//! its node down with it.

use super::binary::locate_executable;
use super::Liveness;
use crate::chain::ChainKind;
use crate::config::NodeConfig;
use crate::error::SessionError;
use crate::rpc::RpcSession;
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Everything needed to bring up one node.
#[derive(Debug, Clone)]
pub struct NodeLaunch<'a> {
    /// Existing data directory; a scratch directory is created when `None`
    pub node_dir: Option<&'a Path>,
    pub chain: ChainKind,
    /// Executable name on `PATH` or explicit path
    pub executable: &'a str,
    pub mock_time: u64,
    pub config: &'a NodeConfig,
}

/// Write the chain's config file into `node_dir` and return its path.
pub fn write_config_file(
    node_dir: &Path,
    chain: ChainKind,
    config: &NodeConfig,
) -> Result<PathBuf, SessionError> {
    let path = node_dir.join(chain.config_file_name());
    let contents = format!(
        "regtest=1\n\
         server=1\n\
         txindex=1\n\
         rpcuser={user}\n\
         rpcpassword={password}\n\
         \n\
         [regtest]\n\
         rpcport={port}\n\
         fallbackfee=0.0002\n",
        user = config.rpc_user,
        password = config.rpc_password,
        port = config.rpc_port,
    );
    fs::write(&path, contents)
        .map_err(|e| SessionError::io(format!("Failed to write {}", path.display()), e))?;
    Ok(path)
}

/// Command-line arguments for the node process.
pub fn launch_args(node_dir: &Path, chain: ChainKind, rpc_port: u16, mock_time: u64) -> Vec<String> {
    let mut args = vec![
        format!("-rpcport={}", rpc_port),
        format!("-datadir={}", node_dir.display()),
        format!("-mocktime={}", mock_time),
        "-reindex".to_string(),
    ];
    args.extend(chain.launch_flags().iter().map(|flag| flag.to_string()));
    args
}

/// Starts node processes.
pub struct NodeSupervisor;

impl NodeSupervisor {
    /// Launch a node and block until its RPC interface answers.
    ///
    /// # Errors
    /// * `Directory` - `node_dir` was given but does not exist
    /// * `Executable` - the executable cannot be found or is not executable
    /// * `Spawn` - the process could not be started
    /// * `NodeUnavailable` - the process exited, or never answered within
    ///   `settle_timeout`
    pub fn start(launch: &NodeLaunch<'_>) -> Result<NodeHandle, SessionError> {
        let (data_dir, scratch) = match launch.node_dir {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(SessionError::Directory {
                        path: dir.to_path_buf(),
                    });
                }
                (dir.to_path_buf(), None)
            }
            None => {
                let scratch = TempDir::new()
                    .map_err(|e| SessionError::io("Failed to create scratch node directory", e))?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };
        info!("Using node directory {}", data_dir.display());

        let executable = locate_executable(launch.executable)?;

        let conf_file = write_config_file(&data_dir, launch.chain, launch.config)?;
        info!("Config file created at {}", conf_file.display());

        let rpc = RpcSession::new(
            launch.config.rpc_port,
            &launch.config.rpc_user,
            &launch.config.rpc_password,
        )?;

        let args = launch_args(&data_dir, launch.chain, launch.config.rpc_port, launch.mock_time);
        info!("Executing {} {}", executable.display(), args.join(" "));
        let child = Command::new(&executable)
            .args(&args)
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                path: executable.clone(),
                source,
            })?;

        let mut handle = NodeHandle {
            child: Some(child),
            rpc,
            data_dir,
            poll_interval: launch.config.poll_interval,
            shutdown_timeout: launch.config.shutdown_timeout,
            _scratch: scratch,
        };

        info!(
            "Waiting up to {} seconds for node to start",
            launch.config.settle_timeout.as_secs_f32()
        );
        let height = handle.wait_until_ready(launch.config.settle_timeout)?;
        info!("Node ready at block height {}", height);
        Ok(handle)
    }
}

/// A running node. Dropping the handle stops the node.
#[derive(Debug)]
pub struct NodeHandle {
    child: Option<Child>,
    rpc: RpcSession,
    data_dir: PathBuf,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    // Declared last so the directory outlives the process using it
    _scratch: Option<TempDir>,
}

impl NodeHandle {
    pub fn rpc(&self) -> &RpcSession {
        &self.rpc
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// OS process id, while the node is supervised.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn is_running(&mut self) -> bool {
        self.ensure_alive().is_ok()
    }

    fn wait_until_ready(&mut self, settle_timeout: Duration) -> Result<u64, SessionError> {
        let deadline = Instant::now() + settle_timeout;
        loop {
            self.ensure_alive()?;
            // A stalled node must not hold a single attempt past the deadline
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = remaining.max(Duration::from_millis(1));
            match self.rpc.get_block_count_within(attempt) {
                Ok(height) => return Ok(height),
                Err(e) if e.is_transport() || e.is_warmup() => {
                    debug!("Node not ready yet: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(SessionError::NodeUnavailable {
                    reason: format!("no RPC response within {:?}", settle_timeout),
                });
            }
            sleep(self.poll_interval);
        }
    }

    /// Stop the node: RPC `stop`, bounded wait, then kill.
    ///
    /// Calling this more than once is a no-op.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let exited = child
            .try_wait()
            .map_err(|e| SessionError::io("Failed to poll node process", e))?;
        if let Some(status) = exited {
            info!("Node had already exited ({})", status);
            return Ok(());
        }

        info!(
            "Waiting {} seconds for node to quit",
            self.shutdown_timeout.as_secs_f32()
        );
        if let Err(e) = self.rpc.stop(self.shutdown_timeout) {
            debug!("RPC stop failed, falling back to kill: {}", e);
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => {
                    info!("Node has terminated");
                    return Ok(());
                }
                Ok(None) => sleep(self.poll_interval),
                Err(e) => return Err(SessionError::io("Failed to poll node process", e)),
            }
        }

        warn!("Node did not quit within {:?}, killing it", self.shutdown_timeout);
        // kill fails only if the process already exited between polls
        let _ = child.kill();
        child
            .wait()
            .map_err(|e| SessionError::io("Failed to reap node process", e))?;
        info!("Node has terminated");
        Ok(())
    }
}

impl Liveness for NodeHandle {
    fn ensure_alive(&mut self) -> Result<(), SessionError> {
        let Some(child) = self.child.as_mut() else {
            return Err(SessionError::NodeUnavailable {
                reason: "node has been stopped".to_string(),
            });
        };
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(SessionError::NodeUnavailable {
                reason: format!("node process exited ({})", status),
            }),
            Err(e) => Err(SessionError::NodeUnavailable {
                reason: format!("cannot poll node process: {}", e),
            }),
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop node in {}: {}", self.data_dir.display(), e);
        }
    }
}
