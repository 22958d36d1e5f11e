//! Process entry point: resolves configuration, wires a JSON-RPC client
//! into a block cache, and drives the requested estimator(s) on a fixed
//! interval until the process is asked to stop.

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::Parser;
use gas_cache::{BlockCache, Sweeper};
use gas_rpc_client::RpcClient;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_OUTPUT_DIR: &str = "./output/";

#[derive(Parser)]
#[clap(name = "gas_cli", about = "Ethereum gas-price estimator runner")]
struct Cli {
    /// JSON-RPC endpoint of the node to sample blocks from.
    #[clap(long, env = "GAS_ESTIMATOR_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Directory CSV score files are written to.
    #[clap(long, env = "GAS_ESTIMATOR_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Naive percentile-of-recent-block-minimums estimator.
    Naive {
        #[clap(long, default_value_t = 20)]
        blocks: u64,
        #[clap(long, default_value_t = 60)]
        percentile: u32,
    },
    /// Hash-power ("gas station express") estimator.
    Express,
    /// Time-based probability estimator (fast/medium/slow/glacial).
    Web3j,
    /// Runs all three estimators concurrently.
    All {
        #[clap(long, default_value_t = 20)]
        blocks: u64,
        #[clap(long, default_value_t = 60)]
        percentile: u32,
    },
}

fn init_logging() {
    tracing_log::LogTracer::init().expect("LogTracer::init must only be called once");

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::from_default_env());
    Registry::default().with(fmt_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    validate_percentile(&cli.command)?;

    let rpc = Arc::new(RpcClient::new(&cli.rpc_url).context("invalid RPC URL")?);
    let cache = Arc::new(BlockCache::new(rpc));
    let sweeper = Sweeper::spawn(cache.clone());

    let result = run(&cli, cache).await;

    sweeper.close().await;
    result
}

async fn run_until_shutdown(
    driver: impl std::future::Future<Output = Result<(), gas_driver::TickError>>,
) -> anyhow::Result<()> {
    tokio::select! {
        result = driver => result.map_err(|e| anyhow::anyhow!(e)),
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal");
            Ok(())
        }
    }
}

fn validate_percentile(command: &Command) -> anyhow::Result<()> {
    let percentile = match command {
        Command::Naive { percentile, .. } | Command::All { percentile, .. } => Some(*percentile),
        Command::Express | Command::Web3j => None,
    };
    if let Some(p) = percentile {
        if p == 0 || p > 100 {
            bail!("--percentile must be between 1 and 100, got {p}");
        }
    }
    Ok(())
}

async fn run(cli: &Cli, cache: Arc<BlockCache>) -> anyhow::Result<()> {
    let output_dir = cli.output_dir.clone();

    match &cli.command {
        Command::Naive { blocks, percentile } => {
            let config = gas_naive::NaiveConfig {
                blocks: *blocks,
                percentile: *percentile,
            };
            let mut estimator = gas_naive::NaiveEstimator::new(config, cache);
            run_until_shutdown(gas_driver::run("naive", &mut estimator, &output_dir)).await
        }
        Command::Express => {
            let mut estimator = gas_express::ExpressEstimator::new(cache);
            run_until_shutdown(gas_driver::run("express", &mut estimator, &output_dir)).await
        }
        Command::Web3j => {
            let mut estimator = gas_timebased::TimeBasedEstimator::new(cache);
            run_until_shutdown(gas_driver::run("web3j", &mut estimator, &output_dir)).await
        }
        Command::All { blocks, percentile } => {
            let naive_config = gas_naive::NaiveConfig {
                blocks: *blocks,
                percentile: *percentile,
            };
            let mut naive = gas_naive::NaiveEstimator::new(naive_config, cache.clone());
            let mut express = gas_express::ExpressEstimator::new(cache.clone());
            let mut web3j = gas_timebased::TimeBasedEstimator::new(cache);

            let naive_driver = gas_driver::run("naive", &mut naive, &output_dir);
            let express_driver = gas_driver::run("express", &mut express, &output_dir);
            let web3j_driver = gas_driver::run("web3j", &mut web3j, &output_dir);

            tokio::select! {
                result = naive_driver => result.map_err(|e| anyhow::anyhow!(e)),
                result = express_driver => result.map_err(|e| anyhow::anyhow!(e)),
                result = web3j_driver => result.map_err(|e| anyhow::anyhow!(e)),
                _ = tokio::signal::ctrl_c() => {
                    log::info!("received shutdown signal");
                    Ok(())
                }
            }
        }
    }
}
