//! `aigis` binary: parses `-c/--config`, brings up the supervisor (which
//! starts the broker before anything else loads), drives the fixed-order
//! plugin load, then blocks on SIGINT for a clean shutdown.

use std::path::PathBuf;

use aigis_core::config::TopLevelConfig;
use aigis_core::{logging, Supervisor};
use clap::Parser;

#[derive(Parser)]
#[command(name = "aigis", about = "Plugin host supervisor")]
struct Cli {
    /// Path to the top-level TOML configuration. Defaults to
    /// `$XDG_CONFIG_HOME/aigis/config.toml` (or the platform equivalent) if
    /// omitted.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("aigis").join("config.toml"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(default_config_path)
        .ok_or_else(|| anyhow::anyhow!("no -c/--config given and no default config directory found"))?;

    let repo_root = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));

    let _log_handles = logging::init_global(&repo_root)?;

    let config = TopLevelConfig::load(&config_path).map_err(|e| {
        tracing::error!(target: "aigis::boot", "failed to load {}: {e}", config_path.display());
        e
    })?;

    let supervisor = Supervisor::bootstrap(&repo_root)?;
    supervisor.load_all(&config);
    tracing::info!(target: "aigis::boot", live = supervisor.live_count(), "startup complete");

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    supervisor.shutdown();
    tracing::warn!(target: "aigis::shutdown", "clean shutdown complete");
    Ok(())
}
