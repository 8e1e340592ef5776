//! Shared chain forked into two successors.
//!
//! ## Protocol
//!
//! ```text
//!             shared session (node A, <node_dir>/shared)
//!                          |
//!                  node A stopped
//!                          |
//!            +-------------+-------------+
//!            | copy                      | copy
//!   <node_dir>/<chain>-main     <node_dir>/<chain>-fork
//!            |                           |
//!   main session (node B)       fork session (node C)
//! ```
//!
//! Both copies are complete before either successor starts. The successors
//! resume the mock clock from the shared session's final time and never see
//! each other's process or files.

use crate::chain::ChainKind;
use crate::config::NodeConfig;
use crate::generator::Branch;
use crate::pipeline::GeneratorPipeline;
use crate::session::{Session, SessionOptions, SessionReport};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Inputs of a forked run.
#[derive(Debug, Clone)]
pub struct ForkOptions {
    pub output_dir: PathBuf,
    /// Root holding the shared, main and fork node directories
    pub node_dir: PathBuf,
    pub chain: ChainKind,
    pub executable: String,
    pub start_time: u64,
    pub node: NodeConfig,
    pub truncate_block_file: bool,
}

/// Reports of the three sessions of a forked run.
#[derive(Debug, Clone)]
pub struct ForkReport {
    pub shared: SessionReport,
    pub main: SessionReport,
    pub fork: SessionReport,
}

impl ForkReport {
    /// Height of the last block common to both successors.
    pub fn fork_height(&self) -> u64 {
        self.shared.end_height
    }
}

pub struct ChainForker {
    options: ForkOptions,
}

impl ChainForker {
    pub fn new(options: ForkOptions) -> Self {
        ChainForker { options }
    }

    /// Node data directory of `branch`.
    pub fn node_dir_for(&self, branch: Branch) -> PathBuf {
        match branch {
            Branch::Shared => self.options.node_dir.join("shared"),
            Branch::Main | Branch::Fork => self
                .options
                .node_dir
                .join(format!("{}-{}", self.options.chain, branch)),
        }
    }

    /// Output root of `branch`; the session adds `<chain>/` below it.
    pub fn output_dir_for(&self, branch: Branch) -> PathBuf {
        self.options.output_dir.join(branch.as_str())
    }

    pub fn run(&self, pipeline: &GeneratorPipeline) -> Result<ForkReport> {
        let shared_dir = self.node_dir_for(Branch::Shared);
        prepare_empty_dir(&shared_dir)
            .wrap_err_with(|| format!("Failed to prepare {}", shared_dir.display()))?;

        info!("Building shared chain in {}", shared_dir.display());
        let shared = self
            .run_branch(Branch::Shared, self.options.start_time, pipeline)
            .wrap_err("Shared session failed")?;

        // The shared node is stopped by now, so its directory is quiescent
        let main_dir = self.node_dir_for(Branch::Main);
        let fork_dir = self.node_dir_for(Branch::Fork);
        for target in [&main_dir, &fork_dir] {
            info!("Copying {} to {}", shared_dir.display(), target.display());
            if target.exists() {
                fs::remove_dir_all(target)
                    .wrap_err_with(|| format!("Failed to remove stale {}", target.display()))?;
            }
            copy_dir_recursive(&shared_dir, target)
                .wrap_err_with(|| format!("Failed to copy node directory to {}", target.display()))?;
        }

        info!(
            "Forking at height {}, successors resume at mock-time {}",
            shared.end_height, shared.final_time
        );
        let main = self
            .run_branch(Branch::Main, shared.final_time, pipeline)
            .wrap_err("Main session failed")?;
        let fork = self
            .run_branch(Branch::Fork, shared.final_time, pipeline)
            .wrap_err("Fork session failed")?;

        for successor in [&main, &fork] {
            if successor.start_height != shared.end_height {
                warn!(
                    "{} chain started at height {}, expected the shared height {}",
                    successor.branch, successor.start_height, shared.end_height
                );
            }
        }

        Ok(ForkReport { shared, main, fork })
    }

    fn run_branch(
        &self,
        branch: Branch,
        start_time: u64,
        pipeline: &GeneratorPipeline,
    ) -> Result<SessionReport> {
        let options = SessionOptions {
            output_dir: self.output_dir_for(branch),
            node_dir: Some(self.node_dir_for(branch)),
            chain: self.options.chain,
            executable: self.options.executable.clone(),
            start_time,
            node: self.options.node.clone(),
            truncate_block_file: self.options.truncate_block_file,
            branch,
        };
        let mut session = Session::open(options)?;
        let report = session.run(pipeline)?;
        info!(
            "{} chain done: {} blocks generated, height {}",
            branch,
            report.blocks_generated(),
            report.end_height
        );
        Ok(report)
    }
}

/// Remove `dir` if present and recreate it empty.
fn prepare_empty_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        debug!("Removing stale {}", dir.display());
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

/// Copy the tree under `src` into `dst`, creating `dst`.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&entry.path(), &target)?;
        } else {
            copied += fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}
