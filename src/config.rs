//! Process configuration
//!
//! Every option can be set as a flag or through its environment variable.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Default resync period in seconds
pub const DEFAULT_SYNC_PERIOD_SECS: u64 = 30;

/// Default number of blocks a target may lag behind the tallest one
pub const DEFAULT_BLOCK_MISS: u64 = 6;

/// Default per-probe timeout in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Port serving the node's `/status` endpoint
pub const DEFAULT_STATUS_PORT: u16 = 26657;

#[derive(Parser, Debug, Clone)]
#[command(name = "endpoint-controller")]
#[command(about = "Keeps Endpoints in sync with the health of external blockchain nodes", long_about = None)]
#[command(version)]
pub struct Config {
    /// Seconds between two full resyncs
    #[arg(long, env = "SYNC_PERIOD", default_value_t = DEFAULT_SYNC_PERIOD_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub sync_period: u64,

    /// Blocks a target may trail the tallest healthy target before it is dropped
    #[arg(long, env = "BLOCK_MISS", default_value_t = DEFAULT_BLOCK_MISS)]
    pub block_miss: u64,

    /// Seconds before a single port or status probe is abandoned
    #[arg(long, env = "PROBE_TIMEOUT", default_value_t = DEFAULT_PROBE_TIMEOUT_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub probe_timeout: u64,

    /// Port of the chain status API on every target
    #[arg(long, env = "STATUS_PORT", default_value_t = DEFAULT_STATUS_PORT)]
    pub status_port: u16,

    /// Also reconcile as soon as an opted-in Service changes
    #[arg(long, env = "WATCH", default_value_t = true, action = clap::ArgAction::Set)]
    pub watch: bool,

    /// Listen address of the health and metrics server
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Config {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_period)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_period: DEFAULT_SYNC_PERIOD_SECS,
            block_miss: DEFAULT_BLOCK_MISS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT_SECS,
            status_port: DEFAULT_STATUS_PORT,
            watch: true,
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_json: false,
        }
    }
}
