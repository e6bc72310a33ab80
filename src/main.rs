mod transport;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use remoteid_shared::clock::SystemClock;
use remoteid_shared::keys::SIGNATURE_SCHEME_NOTE;
use remoteid_shared::{timing, ClientConfig, CommandSigner, PrivateKey, SecureCommandClient};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use transport::{spawn_link, TcpConnector};

/// Apply a signed configuration change to a Remote ID node
#[derive(Parser, Debug)]
#[command(name = "secure-command", version, about, after_help = SIGNATURE_SCHEME_NOTE)]
struct Cli {
    /// Node or bus gateway address
    #[arg(long, default_value = "127.0.0.1:9090")]
    endpoint: String,

    /// Our own node id on the bus
    #[arg(long, default_value_t = 100)]
    node_id: u32,

    /// Node id of the Remote ID device
    #[arg(long)]
    target_node: u32,

    /// PRIVATE_KEYV1 key file
    #[arg(long)]
    private_key: PathBuf,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = timing::DEFAULT_TIMEOUT_MS as f64 / 1000.0)]
    timeout: f64,

    /// NAME=VALUE pairs separated by NUL, e.g. "LOCK_LEVEL=1"
    paramop: String,
}

/// Parse arguments. Usage errors exit with status 1, help and version with 0.
fn parse_cli() -> Cli {
    Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(usage_exit_code(&e))
    })
}

fn usage_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = parse_cli();

    let timeout = Duration::try_from_secs_f64(cli.timeout)
        .with_context(|| format!("invalid timeout {}", cli.timeout))?;
    if timeout.is_zero() {
        bail!("timeout must be positive");
    }

    let private_key = PrivateKey::load(&cli.private_key)
        .with_context(|| format!("failed to load private key {}", cli.private_key.display()))?;
    let signer = CommandSigner::new(private_key);

    let connector = TcpConnector::new(cli.endpoint.clone(), Duration::from_secs(5));
    info!("Connecting to {}", connector.address());
    let stream = connector.connect().await?;
    let link = spawn_link(stream, cli.node_id);

    let config = ClientConfig {
        target_node: cli.target_node,
        timeout,
        ..Default::default()
    };
    let mut client = SecureCommandClient::new(config, signer, &cli.paramop, link, SystemClock)?;

    info!(
        "Node {} -> {}: applying {} config bytes",
        cli.node_id,
        cli.target_node,
        cli.paramop.len()
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(timing::TICK_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match client.tick() {
                    Ok(Some(result)) => {
                        info!("Got change response: {}", result);
                        std::process::exit(result.code() as i32);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Secure command failed: {}", e);
                        return Err(e.into());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}
