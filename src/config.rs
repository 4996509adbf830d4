use std::time::Duration;

use clap::Parser;

use crate::connection::{SyncOptions, BACKOFF_MULTIPLIER};
use crate::endpoint::EndpointSource;
use crate::error::{Result, SyncError};

#[derive(Debug, Parser, Clone)]
#[command(name = "playbook-sync")]
#[command(about = "Mirrors live playbook execution state from the backend event stream")]
pub struct Config {
    #[arg(long, env = "PLAYBOOK_SYNC_URL")]
    pub url: Option<String>,

    #[arg(long, env = "PLAYBOOK_SYNC_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = 1000)]
    pub initial_delay_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub max_delay_ms: u64,

    #[arg(long, default_value_t = BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,

    #[arg(long, default_value_t = 15_000)]
    pub heartbeat_interval_ms: u64,

    /// Reconnect when nothing is received for this long (off by default).
    #[arg(long)]
    pub stale_after_ms: Option<u64>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value_t = false)]
    pub json_output: bool,
}

impl Config {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::new()
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms.max(1)))
            .with_stale_after(self.stale_after_ms.map(Duration::from_millis))
    }
}

impl EndpointSource for Config {
    fn stream_url(&self) -> Result<String> {
        self.url
            .clone()
            .ok_or_else(|| SyncError::endpoint("no stream url (--url or PLAYBOOK_SYNC_URL)"))
    }

    fn access_key(&self) -> Result<String> {
        Ok(self.api_key.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::connection::SyncOptions;
    use crate::endpoint::{resolve, EndpointSource};
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn defaults_match_connection_defaults() {
        let cfg = Config::parse_from(["playbook-sync", "--url", "ws://localhost:8765/ws"]);
        assert_eq!(cfg.initial_delay_ms, 1000);
        assert_eq!(cfg.max_delay_ms, 30_000);
        assert_eq!(cfg.backoff_multiplier, 1.5);
        assert_eq!(cfg.heartbeat_interval_ms, 15_000);
        assert_eq!(cfg.stale_after_ms, None);
        assert_eq!(cfg.sync_options(), SyncOptions::default());
    }

    #[test]
    fn stale_after_flag_enables_timeout() {
        let cfg = Config::parse_from([
            "playbook-sync",
            "--url",
            "ws://localhost/ws",
            "--stale-after-ms",
            "45000",
        ]);
        assert_eq!(
            cfg.sync_options().stale_after,
            Some(Duration::from_millis(45_000))
        );
    }

    #[test]
    fn endpoint_comes_from_flags() {
        let cfg = Config::parse_from([
            "playbook-sync",
            "--url",
            "http://localhost:8765/ws",
            "--api-key",
            "k1",
        ]);
        assert_eq!(resolve(&cfg).unwrap(), "ws://localhost:8765/ws?key=k1");
    }

    #[test]
    fn missing_url_is_an_endpoint_error() {
        let mut cfg = Config::parse_from(["playbook-sync"]);
        cfg.url = None;
        assert!(cfg.stream_url().is_err());
    }
}
