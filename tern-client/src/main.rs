//! tern client entry point.
//!
//! ```text
//! tern-client                     Echo probe against the configured server
//! tern-client --mode chat         Join the chat room
//! tern-client --config <path>     Use custom config TOML
//! tern-client --gen-config        Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tern_client::config::{ClientConfig, Mode};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tern-client", about = "tern WebSocket echo and chat client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tern-client.toml")]
    config: PathBuf,

    /// Server address (overrides config). Example: 127.0.0.1:8080
    #[arg(short, long)]
    server: Option<String>,

    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Chat nickname (overrides config).
    #[arg(short, long)]
    nickname: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(addr) = cli.server {
        config.network.server_address = addr;
    }
    if let Some(mode) = cli.mode {
        config.client.mode = mode;
    }
    if let Some(nickname) = cli.nickname {
        config.client.nickname = nickname;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("tern-client v{}", env!("CARGO_PKG_VERSION"));
    info!("server: {}{}", config.network.server_address, config.target());

    match config.client.mode {
        Mode::Echo => tern_client::echo::run(&config).await,
        Mode::Chat => tern_client::chat::run(&config).await,
    }
}
