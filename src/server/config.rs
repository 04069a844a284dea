//! Environment-backed configuration, loaded once at startup via
//! `dotenvy::dotenv()` + `std::env::var`: no config crate, `unwrap_or_else`
//! per variable.

use std::env;

use crate::ws::HubConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub max_ws_clients: usize,
    pub ws_ping_interval_secs: u64,
    pub ws_pong_timeout_secs: u64,
    pub retention_days: i64,
}

impl AppConfig {
    /// Builds the hub's tunables from defaults, overridable by env.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_clients: self.max_ws_clients,
            ping_interval: std::time::Duration::from_secs(self.ws_ping_interval_secs),
            pong_timeout: std::time::Duration::from_secs(self.ws_pong_timeout_secs),
            ..HubConfig::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();

        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            max_ws_clients: env::var("MAX_WS_CLIENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            ws_ping_interval_secs: env::var("WS_PING_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(54),
            ws_pong_timeout_secs: env::var("WS_PONG_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            retention_days: env::var("RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
        }
    }
}
