//! Compute Task Worker Node
//!
//! Watches a task contract on an EVM chain, computes a result for every new
//! task, submits it and tracks it until accepted.
//!
//! Subcommands:
//! - run: Start the worker (default)
//! - check: Load and validate configuration, then exit
//! - request: Open a compute task on the contract and wait for its receipt

mod config;
mod http;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::{ComputerKind, NodeConfig};
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vb_chain_client::EthChainClient;
use vb_worker::{
    to_hex, DigestAlgorithm, FixedDigestComputer, InputDigestComputer, ResultComputer,
    WorkerMetrics, WorkerService,
};

/// Default task lifecycle for `request`: 30 days.
const DEFAULT_LIFECYCLE_SECS: u64 = 30 * 24 * 3600;

#[derive(Parser)]
#[command(name = "vb-node")]
#[command(about = "Off-chain compute task worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file path (TOML); defaults apply when omitted
    #[arg(short, long, env = "VB_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// EVM JSON-RPC endpoint (overrides config)
    #[arg(long, env = "VB_RPC_URL")]
    rpc_url: Option<String>,

    /// Task contract address (overrides config)
    #[arg(long, env = "VB_CONTRACT_ADDRESS")]
    contract_address: Option<String>,

    /// Hex private key used to sign transactions
    #[arg(long, env = "VB_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Prometheus metrics port, 0 to disable (overrides config)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Result function (overrides config)
    #[arg(long, value_enum)]
    computer: Option<ComputerKind>,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Run the worker until Ctrl+C
    Run,
    /// Validate configuration and exit
    Check,
    /// Request compute over raw data as the signing account
    Request {
        /// Raw data; its keccak-256 is committed in the task input
        #[arg(long)]
        raw_data: String,

        /// Task lifetime in seconds
        #[arg(long, default_value_t = DEFAULT_LIFECYCLE_SECS)]
        lifecycle: u64,
    },
}

impl Cli {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => NodeConfig::default(),
        };

        if let Some(rpc_url) = &self.rpc_url {
            config.chain.rpc_url = rpc_url.clone();
        }
        if let Some(contract_address) = &self.contract_address {
            config.chain.contract_address = contract_address.clone();
        }
        if let Some(metrics_port) = self.metrics_port {
            config.metrics_port = metrics_port;
        }
        if let Some(computer) = self.computer {
            config.computer = computer;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(log_level: &str, json_logs: bool) -> Result<()> {
    let log_level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_line_number(true);

    if json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn make_computer(kind: ComputerKind) -> Arc<dyn ResultComputer> {
    match kind {
        ComputerKind::FixedDigest => Arc::new(FixedDigestComputer::default()),
        ComputerKind::FixedSha256 => {
            Arc::new(FixedDigestComputer::default().with_algorithm(DigestAlgorithm::Sha256))
        }
        ComputerKind::InputDigest => Arc::new(InputDigestComputer),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs)?;

    let config = cli.node_config()?;

    if let Some(Command::Check) = &cli.command {
        info!(
            rpc_url = %config.chain.rpc_url,
            contract = %config.chain.contract_address,
            computer = ?config.computer,
            metrics_port = config.metrics_port,
            private_key_set = cli.private_key.is_some(),
            "Configuration OK"
        );
        return Ok(());
    }

    let private_key = cli
        .private_key
        .as_deref()
        .ok_or_else(|| anyhow!("private key required (--private-key or VB_PRIVATE_KEY)"))?;

    if let Some(Command::Request {
        raw_data,
        lifecycle,
    }) = &cli.command
    {
        let chain = EthChainClient::connect(config.chain.clone(), private_key)
            .await
            .context("connecting to chain")?;
        let request = chain
            .request_compute(raw_data.as_bytes(), *lifecycle)
            .await
            .context("requesting compute")?;
        info!(
            task_id = request.task_id,
            input_data = %to_hex(&request.input_data),
            tx_hash = %to_hex(&request.confirmation.tx_hash),
            block = request.confirmation.block_number,
            lifecycle_secs = *lifecycle,
            "Compute task created"
        );
        return Ok(());
    }

    info!("Starting compute task worker");
    info!(
        rpc_url = %config.chain.rpc_url,
        contract = %config.chain.contract_address,
        computer = ?config.computer,
        "Config loaded"
    );

    let chain = EthChainClient::connect(config.chain.clone(), private_key)
        .await
        .context("connecting to chain")?;
    info!(signer = ?chain.signer_address(), "Signing key loaded");

    let registry = Registry::new();
    let metrics = WorkerMetrics::new(&registry)?;
    let chain = chain.with_metrics(metrics.clone());

    let service = WorkerService::new(
        config.worker.clone(),
        Arc::new(chain),
        make_computer(config.computer),
        Some(metrics),
    );
    let shutdown = service.shutdown_handle();

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        let metrics_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve_metrics(registry, addr, metrics_shutdown).await {
                warn!(error = %e, "Metrics endpoint failed");
            }
        });
    } else {
        info!("Metrics endpoint disabled");
    }

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
        ctrl_c_shutdown.cancel();
    });

    let result = service.run().await;
    shutdown.cancel();

    match result {
        Ok(()) => {
            info!("Compute task worker stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Compute task worker failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "vb-node",
            "--rpc-url",
            "http://node:8545",
            "--contract-address",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            "--metrics-port",
            "0",
            "--computer",
            "input-digest",
            "check",
        ]);

        let config = cli.node_config().unwrap();
        assert_eq!(config.chain.rpc_url, "http://node:8545");
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.computer, ComputerKind::InputDigest);
        assert!(matches!(cli.command, Some(Command::Check)));
    }

    #[test]
    fn test_request_subcommand_defaults() {
        let cli = Cli::parse_from(["vb-node", "request", "--raw-data", "1"]);
        match cli.command {
            Some(Command::Request {
                raw_data,
                lifecycle,
            }) => {
                assert_eq!(raw_data, "1");
                assert_eq!(lifecycle, 2_592_000);
            }
            _ => panic!("expected request subcommand"),
        }
    }

    #[test]
    fn test_request_subcommand_lifecycle() {
        let cli = Cli::parse_from([
            "vb-node",
            "request",
            "--raw-data",
            "payload",
            "--lifecycle",
            "60",
        ]);
        assert!(matches!(
            cli.command,
            Some(Command::Request { lifecycle: 60, .. })
        ));
    }

    #[test]
    fn test_fixed_sha256_computer_kind() {
        let cli = Cli::parse_from(["vb-node", "--computer", "fixed-sha256"]);
        assert_eq!(cli.computer, Some(ComputerKind::FixedSha256));
        assert_eq!(make_computer(ComputerKind::FixedSha256).name(), "fixed-sha256");
        assert_eq!(make_computer(ComputerKind::FixedDigest).name(), "fixed-digest");
    }

    #[test]
    fn test_cli_without_contract_fails_validation() {
        let cli = Cli::parse_from(["vb-node", "--rpc-url", "http://node:8545"]);
        if std::env::var("VB_CONTRACT_ADDRESS").is_err() {
            assert!(cli.node_config().is_err());
        }
    }
}
