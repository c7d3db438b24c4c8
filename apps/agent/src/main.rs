//! Courier agent entry point.

mod app;
mod config;
mod logging;

use config::{Config, ConfigSource};

fn main() -> anyhow::Result<()> {
    let path = config::config_path();
    let (config, source) = Config::load(&path)?;
    config.validate()?;

    // The log directory must exist before the file layer opens.
    config.create_directories()?;
    let _log_guard = logging::init(&config.directories.log_dir, &config.log.file)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %config.log_file_path().display(),
        "starting courier agent"
    );
    match source {
        ConfigSource::Created => {
            tracing::info!(path = %path.display(), "configuration file not found, created with defaults");
        }
        ConfigSource::Existing { added } if !added.is_empty() => {
            tracing::info!(path = %path.display(), added = ?added, "configuration completed with default values");
        }
        ConfigSource::Existing { .. } => {
            tracing::info!(path = %path.display(), "configuration loaded");
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
