//! Command-line surface of `soundrelayd`

use anyhow::{Context, Result};
use clap::Parser;
use soundrelay_audio_core::AudioBackend;
use soundrelay_session_core::{ManagerConfig, MediaConfig, SessionManager};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::logging::{self, LoggingConfig};

/// Hosts durable audio sessions that bridge native devices to RTP peers
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Sessions file
    #[arg(long, env = "SOUNDRELAY_STORE", default_value = "data/sessions.json")]
    pub store: PathBuf,

    /// Upper bound on one SDP negotiation, in seconds
    #[arg(long, env = "SOUNDRELAY_NEGOTIATION_TIMEOUT_SECS", default_value_t = 10)]
    pub negotiation_timeout_secs: u64,

    /// How long removing a session waits for its engine to stop, in seconds
    #[arg(long, env = "SOUNDRELAY_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Address RTP sockets bind to
    #[arg(long, env = "SOUNDRELAY_BIND_IP", default_value = "0.0.0.0")]
    pub bind_ip: IpAddr,

    /// Address written into SDP answers
    #[arg(long, env = "SOUNDRELAY_ADVERTISED_IP")]
    pub advertised_ip: Option<IpAddr>,

    /// Packetization time when an offer has no ptime
    #[arg(long, env = "SOUNDRELAY_PTIME_MS", default_value_t = 20)]
    pub ptime_ms: u32,

    /// Minimum ring depth in blocks
    #[arg(long, env = "SOUNDRELAY_RING_BLOCKS", default_value_t = 8)]
    pub ring_blocks: usize,

    /// trace, debug, info, warn or error
    #[arg(long, env = "SOUNDRELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "SOUNDRELAY_LOG_JSON")]
    pub log_json: bool,

    /// Include source file and line in log lines
    #[arg(long, env = "SOUNDRELAY_LOG_SOURCE")]
    pub log_source: bool,

    /// Print the audio device catalog as JSON and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Print the persisted sessions as JSON and exit
    #[arg(long)]
    pub list_sessions: bool,
}

impl Cli {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new(&self.store)
            .with_negotiation_timeout(Duration::from_secs(self.negotiation_timeout_secs))
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .with_ring_capacity_blocks(self.ring_blocks.max(1))
            .with_media(
                MediaConfig::default()
                    .with_bind_ip(self.bind_ip)
                    .with_advertised_ip(self.advertised_ip)
                    .with_ptime_ms(self.ptime_ms),
            )
    }

    pub fn logging_config(&self) -> Result<LoggingConfig> {
        let level = logging::parse_log_level(&self.log_level)?;
        Ok(LoggingConfig::new(level, "soundrelayd")
            .with_json(self.log_json)
            .with_file_info(self.log_source))
    }

    pub async fn execute(self) -> Result<()> {
        let logging_config = self.logging_config()?;
        logging::setup_logging(&logging_config)?;
        logging::log_welcome(&logging_config, env!("CARGO_PKG_VERSION"));

        let config = self.manager_config();
        let manager = SessionManager::with_rtp(config, audio_backend())
            .await
            .with_context(|| format!("failed to load sessions from {}", self.store.display()))?;

        if self.list_devices {
            let catalog = manager.catalog().await?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
            return Ok(());
        }
        if self.list_sessions {
            println!("{}", serde_json::to_string_pretty(&manager.list())?);
            return Ok(());
        }

        for session in manager.list() {
            info!(
                "Session {} '{}' ({}, device {})",
                session.id(),
                session.config.name,
                session.config.direction,
                session
                    .config
                    .device_id()
                    .map_or_else(|| "default".to_string(), |id| id.to_string())
            );
        }

        info!("Ready, press Ctrl+C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }

        info!("Shutting down");
        manager.shutdown_all().await;
        Ok(())
    }
}

#[cfg(feature = "device-cpal")]
fn audio_backend() -> Arc<dyn AudioBackend> {
    Arc::new(soundrelay_audio_core::CpalBackend)
}

#[cfg(not(feature = "device-cpal"))]
fn audio_backend() -> Arc<dyn AudioBackend> {
    Arc::new(soundrelay_audio_core::SimulatedBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_manager_defaults() {
        let cli = Cli::parse_from(["soundrelayd"]);
        assert_eq!(cli.manager_config(), ManagerConfig::default());
        assert!(!cli.list_devices);
    }

    #[test]
    fn test_flags_reach_manager_config() {
        let cli = Cli::parse_from([
            "soundrelayd",
            "--store",
            "/var/lib/soundrelay/sessions.json",
            "--negotiation-timeout-secs",
            "3",
            "--bind-ip",
            "127.0.0.1",
            "--advertised-ip",
            "192.0.2.10",
            "--ring-blocks",
            "16",
        ]);
        let config = cli.manager_config();

        assert_eq!(config.store_path, PathBuf::from("/var/lib/soundrelay/sessions.json"));
        assert_eq!(config.negotiation_timeout, Duration::from_secs(3));
        assert_eq!(config.ring_capacity_blocks, 16);
        assert_eq!(config.media.bind_ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.media.advertised_ip, Some("192.0.2.10".parse().unwrap()));
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let cli = Cli::parse_from(["soundrelayd", "--log-level", "chatty"]);
        assert!(cli.logging_config().is_err());
    }
}
