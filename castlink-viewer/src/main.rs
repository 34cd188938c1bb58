//! castlink viewer — entry point.
//!
//! ```text
//! castlink-viewer                       Connect per castlink-viewer.toml
//! castlink-viewer --host 10.0.0.2:9750  Connect to an explicit host
//! castlink-viewer --remote-control      Request remote control on connect
//! castlink-viewer --no-audio            Skip audio playback
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use castlink_viewer::config::ViewerConfig;
use castlink_viewer::session;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "castlink-viewer", about = "castlink screen-sharing viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "castlink-viewer.toml")]
    config: PathBuf,

    /// Host address (overrides the config file).
    #[arg(long)]
    host: Option<String>,

    /// Request remote control after connecting.
    #[arg(long)]
    remote_control: bool,

    /// Disable audio playback.
    #[arg(long)]
    no_audio: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.connection.host = host;
    }
    if cli.remote_control {
        config.remote_control.request_on_connect = true;
    }
    if cli.no_audio {
        config.audio.enabled = false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("castlink-viewer v{}", env!("CARGO_PKG_VERSION"));

    tokio::select! {
        result = session::run(config) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received — shutting down");
        }
    }

    Ok(())
}
