use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_core::modules::NullCaptureBackend;
use warden_core::queue::QueueOptions;
use warden_core::{Host, HostConfig, StdoutWriter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Modular host with an operator command console")]
struct Cli {
    /// Directory scanned for capability bundles
    #[arg(long, default_value = "plugins")]
    plugin_dir: PathBuf,

    /// Directory holding module configuration files
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Directory for the network log and capture dumps
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Idle time in milliseconds before an ephemeral queue worker exits
    #[arg(long, default_value_t = 5_000)]
    idle_timeout_ms: u64,
}

impl Cli {
    fn host_config(&self) -> HostConfig {
        HostConfig {
            plugin_dir: self.plugin_dir.clone(),
            config_dir: self.config_dir.clone(),
            log_dir: self.log_dir.clone(),
            queue: QueueOptions {
                idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            },
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let host = Host::start(
        cli.host_config(),
        Arc::new(StdoutWriter),
        Arc::new(NullCaptureBackend),
    )
    .context("failed to start host")?;

    let signal = host.shutdown_signal().clone();
    ctrlc::set_handler(move || signal.trigger()).context("failed to install Ctrl-C handler")?;

    host.run_until_stopped(io::BufReader::new(io::stdin()))
        .context("host stopped abnormally")?;
    info!("bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_host_config() {
        let cli = Cli::parse_from([
            "warden",
            "--plugin-dir",
            "/opt/warden/plugins",
            "--idle-timeout-ms",
            "250",
        ]);
        let config = cli.host_config();
        assert_eq!(config.plugin_dir, PathBuf::from("/opt/warden/plugins"));
        assert_eq!(config.config_dir, PathBuf::from("config"));
        assert_eq!(config.queue.idle_timeout, Duration::from_millis(250));
    }

    #[test]
    fn defaults_match_host_defaults() {
        let cli = Cli::parse_from(["warden"]);
        assert_eq!(cli.host_config(), HostConfig::default());
    }
}
