//! Yandex Cloud Discovery CLI
//!
//! Prints the addresses of the instances in a folder that carry a label,
//! one per line.
//!
//! # Usage
//! ```bash
//! # go-discover style key=value arguments
//! yc-discover folder_id=b1g... label_name=role label_value=worker
//!
//! # Flags, with env fallbacks
//! YC_FOLDER_ID=b1g... yc-discover --label-name role --label-value worker --addr-type public_v4
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use yc_discover::config::HELP;
use yc_discover::{CliTokenMinter, HttpComputeConnector, Provider, TokenCache};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "yc-discover")]
#[command(about = "Discover cluster peers on Yandex Cloud by instance label", long_about = None)]
#[command(version)]
struct Cli {
    /// Provider arguments as key=value pairs; they override the flags below
    #[arg(value_name = "KEY=VALUE")]
    args: Vec<String>,

    /// Yandex Cloud folder ID
    #[arg(long, env = "YC_FOLDER_ID")]
    folder_id: Option<String>,

    /// Label name to filter on
    #[arg(long)]
    label_name: Option<String>,

    /// Label value to filter on
    #[arg(long)]
    label_value: Option<String>,

    /// private_v4, public_v4 or public_v6
    #[arg(long)]
    addr_type: Option<String>,

    /// Pre-minted IAM token (skips `yc iam create-token`)
    #[arg(long, env = "YC_IAM_TOKEN", hide_env_values = true)]
    iam_token: Option<String>,

    /// Compute API endpoint
    #[arg(long, env = "YC_COMPUTE_ENDPOINT", default_value = yc_discover::compute::COMPUTE_API)]
    endpoint: String,

    /// Path to the yc CLI
    #[arg(long, default_value = "yc")]
    yc_path: String,

    /// Seconds to wait for `yc iam create-token`
    #[arg(long, default_value = "30")]
    mint_timeout: u64,

    /// Print provider help and exit
    #[arg(long)]
    provider_help: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Merge flags and key=value arguments into the provider argument map
    fn provider_args(&self) -> Result<HashMap<String, String>> {
        let mut args = HashMap::from([("provider".to_string(), "yc".to_string())]);

        let flags = [
            ("folder_id", &self.folder_id),
            ("label_name", &self.label_name),
            ("label_value", &self.label_value),
            ("addr_type", &self.addr_type),
            ("iam_token", &self.iam_token),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                args.insert(key.to_string(), value.clone());
            }
        }

        for pair in &self.args {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("Expected KEY=VALUE, got {:?}", pair);
            };
            args.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(args)
    }
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.provider_help {
        print!("{}", HELP);
        return Ok(());
    }

    init_logging(cli.verbose, cli.json_logs)?;

    let args = cli.provider_args()?;

    let minter = CliTokenMinter::with_command(cli.yc_path.as_str(), &["iam", "create-token"])
        .with_timeout(Duration::from_secs(cli.mint_timeout));
    let provider = Provider::new(
        Arc::new(TokenCache::new(Arc::new(minter))),
        Arc::new(HttpComputeConnector::new(cli.endpoint.as_str())),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling discovery");
            on_signal.cancel();
        }
    });

    let addrs = provider
        .addrs(&args, &cancel)
        .await
        .context("Discovery failed")?;

    for addr in &addrs {
        println!("{}", addr);
    }

    info!("Discovered {} peers", addrs.len());
    Ok(())
}
