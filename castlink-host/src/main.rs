//! castlink host — entry point.
//!
//! ```text
//! castlink-host                  Run with castlink-host.toml (or defaults)
//! castlink-host --config <path>  Load a custom config TOML
//! castlink-host --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use castlink_host::config::HostConfig;
use castlink_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "castlink-host", about = "castlink screen-sharing host service")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "castlink-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = HostConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("castlink-host v{}", env!("CARGO_PKG_VERSION"));
    info!("listen port: {}", config.network.listen_port);
    info!("target FPS: {}", config.capture.fps);
    info!("audio: {}", config.audio.enabled);

    let service = HostService::new(config);

    tokio::select! {
        result = service.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received — shutting down");
        }
    }

    Ok(())
}
