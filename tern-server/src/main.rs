//! tern server entry point.
//!
//! ```text
//! tern-server                      Run with tern-server.toml (or defaults)
//! tern-server --config <path>      Load a custom config TOML
//! tern-server --listen <addr>      Override the listen address
//! tern-server --mode chat          Override the server mode
//! tern-server --gen-config         Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tern_server::config::{Mode, ServerConfig};
use tern_server::service::TernService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tern-server", about = "tern WebSocket echo and chat server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tern-server.toml")]
    config: PathBuf,

    /// Address to listen on, e.g. 0.0.0.0:8080.
    #[arg(short, long)]
    listen: Option<String>,

    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    if let Some(listen) = cli.listen {
        config.network.listen_address = listen;
    }
    if let Some(mode) = cli.mode {
        config.server.mode = mode;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tern-server v{}", env!("CARGO_PKG_VERSION"));
    info!("listen address: {}", config.network.listen_address);
    info!("mode: {}", config.server.mode);
    info!(
        "idle/probe windows: {}s/{}s",
        config.session.idle_timeout_secs, config.session.probe_timeout_secs
    );

    let service = TernService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;
    Ok(())
}
