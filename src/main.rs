use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn};
use std::path::PathBuf;

use testchain::config::{read_config, CliOverrides, Config, RunMode};
use testchain::{Branch, ChainForker, ForkOptions, GeneratorPipeline, Session, SessionOptions, SessionReport};

/// Build deterministic regtest chains for blockchain-analysis test fixtures
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the run configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving output.json, cospends.txt and the block file
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Node data directory (required for fork mode)
    #[arg(short, long)]
    node_dir: Option<PathBuf>,

    /// Chain to build: btc, bch or ltc
    #[arg(long)]
    chain: Option<String>,

    /// Node executable name or path
    #[arg(short, long = "exec")]
    executable: Option<String>,

    /// Run mode: single or fork
    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<RunMode>,

    /// Mock-time epoch (unix seconds) of the first block
    #[arg(long)]
    start_time: Option<u64>,

    /// Copy the block file without trimming trailing zero space
    #[arg(long)]
    no_truncate: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_mode(value: &str) -> Result<RunMode, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "single" => Ok(RunMode::Single),
        "fork" => Ok(RunMode::Fork),
        other => Err(format!("unknown mode '{}' (expected single or fork)", other)),
    }
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            output_dir: self.output_dir.clone(),
            node_dir: self.node_dir.clone(),
            chain: self.chain.clone(),
            executable: self.executable.clone(),
            mode: self.mode,
            start_time: self.start_time,
            no_truncate: self.no_truncate,
            debug: self.debug,
        }
    }
}

fn log_report(report: &SessionReport) {
    info!(
        "{} {} chain: height {} -> {} ({} blocks), written to {}",
        report.branch,
        report.chain,
        report.start_height,
        report.end_height,
        report.blocks_generated(),
        report.output_dir.display()
    );
    for (kind, count) in &report.address_counts {
        info!("  {}: {}", kind.count_key(), count);
    }
    if report.duplicate_addresses {
        warn!("{} chain reused address key indices", report.branch);
    }
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };
    args.overrides().apply(&mut config);
    config.validate().wrap_err("Invalid configuration")?;

    let level = config.general.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let chain = config.chain_kind()?;
    let pipeline = GeneratorPipeline::from_names(config.pipeline.as_slice())?;

    info!("Starting testchain for {}", chain);
    info!("Output directory: {:?}", config.general.output_dir);
    info!("Pipeline: {}", pipeline.names().join(", "));

    match config.general.mode {
        RunMode::Single => {
            let mut session = Session::open(SessionOptions {
                output_dir: config.general.output_dir.clone(),
                node_dir: config.general.node_dir.clone(),
                chain,
                executable: config.general.executable.clone(),
                start_time: config.general.start_time,
                node: config.node.clone(),
                truncate_block_file: config.general.truncate_block_file,
                branch: Branch::Shared,
            })?;
            let report = session.run(&pipeline)?;
            log_report(&report);
        }
        RunMode::Fork => {
            let node_dir = config
                .general
                .node_dir
                .clone()
                .ok_or_else(|| eyre!("Fork mode requires a node directory"))?;
            let forker = ChainForker::new(ForkOptions {
                output_dir: config.general.output_dir.clone(),
                node_dir,
                chain,
                executable: config.general.executable.clone(),
                start_time: config.general.start_time,
                node: config.node.clone(),
                truncate_block_file: config.general.truncate_block_file,
            });
            let report = forker.run(&pipeline)?;
            for branch in [&report.shared, &report.main, &report.fork] {
                log_report(branch);
            }
            info!("Chains share history up to height {}", report.fork_height());
        }
    }

    info!("Chain generation completed successfully");
    Ok(())
}
