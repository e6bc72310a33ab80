//! Remote ID node simulator
//!
//! Listens for framed secure commands over TCP and applies authorized
//! configuration changes to an in-memory parameter table.

mod params;
mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use remoteid_shared::authority::MAX_PUBLIC_KEYS;
use remoteid_shared::firmware::{self, UpdateAcceptance};
use remoteid_shared::{CommandAuthority, PublicKey};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use params::ParameterTable;
use session::NodeSession;

#[derive(Parser, Debug)]
#[command(name = "remoteid-node", version, about = "Remote ID node answering secure commands")]
struct Cli {
    /// Address to accept operator connections on
    #[arg(long, default_value = "0.0.0.0:9090")]
    listen: String,

    /// Node id this device answers to
    #[arg(long, default_value_t = 10)]
    node_id: u32,

    /// Trusted PUBLIC_KEYV1 key file (repeatable)
    #[arg(long = "public-key")]
    public_keys: Vec<PathBuf>,

    /// Board id of this node, matched against firmware descriptors
    #[arg(long, default_value_t = 0)]
    board_id: u32,

    /// OTA image to check at startup against the keys and LOCK_LEVEL
    #[arg(long)]
    ota_image: Option<PathBuf>,
}

/// Runtime settings of the node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen: String,
    pub node_id: u32,
    pub public_key_files: Vec<PathBuf>,
    pub board_id: u32,
    pub ota_image: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9090".into(),
            node_id: 10,
            public_key_files: Vec::new(),
            board_id: 0,
            ota_image: None,
        }
    }
}

impl From<Cli> for NodeConfig {
    fn from(cli: Cli) -> Self {
        Self {
            listen: cli.listen,
            node_id: cli.node_id,
            public_key_files: cli.public_keys,
            board_id: cli.board_id,
            ota_image: cli.ota_image,
        }
    }
}

fn load_public_keys(files: &[PathBuf]) -> anyhow::Result<Vec<PublicKey>> {
    if files.len() > MAX_PUBLIC_KEYS {
        warn!("Only the first {} public keys are used", MAX_PUBLIC_KEYS);
    }
    files
        .iter()
        .take(MAX_PUBLIC_KEYS)
        .map(|path| {
            PublicKey::load(path).with_context(|| format!("failed to load public key {}", path.display()))
        })
        .collect()
}

/// Run the node's firmware acceptance check on an OTA image file
fn check_ota_image(path: &Path, keys: &[PublicKey], board_id: u32, lock_level: u8) -> anyhow::Result<UpdateAcceptance> {
    let image = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let acceptance = firmware::check_update(&image, keys, board_id, lock_level)
        .with_context(|| format!("firmware {} rejected", path.display()))?;
    Ok(acceptance)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = NodeConfig::from(Cli::parse());

    let public_keys = load_public_keys(&config.public_key_files)?;
    if public_keys.is_empty() {
        warn!("No public keys configured, every secure command will be denied");
    }

    let table = ParameterTable::new();
    for (name, value) in table.iter() {
        info!("  {} = {}", name, value);
    }

    if let Some(path) = &config.ota_image {
        match check_ota_image(path, &public_keys, config.board_id, table.lock_level()) {
            Ok(acceptance) => info!("OTA image accepted: {:?}", acceptance),
            Err(e) => warn!("{:#}", e),
        }
    }

    let authority = Arc::new(Mutex::new(CommandAuthority::new(public_keys, table)));

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("Node {} listening on {}", config.node_id, config.listen);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);

        let authority = authority.clone();
        let node_id = config.node_id;
        tokio::spawn(async move {
            if let Err(e) = NodeSession::new(socket, addr).run(node_id, authority).await {
                error!("Session {} ended: {}", addr, e);
            }
        });
    }
}
