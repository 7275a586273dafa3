//! Environment-driven configuration.
//!
//! Every knob has a default good enough for local development, so a bare
//! `realtime-hub` starts without any environment at all.

use std::collections::HashMap;
use std::env;

use thiserror::Error;

/// Default listen address for the WebSocket and health endpoints
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
/// Default per-connection outbound event queue depth
pub const DEFAULT_SEND_QUEUE_DEPTH: usize = 256;

/// Configuration failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Runtime configuration for one hub instance
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to (`HUB_BIND_ADDRESS`)
    pub bind_address: String,
    /// Outbound event queue depth per connection (`HUB_SEND_QUEUE_DEPTH`).
    /// A connection that falls this far behind starts losing events.
    pub send_queue_depth: usize,
    /// Instance identifier used in logs (`HUB_ID`)
    pub hub_id: String,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from an explicit variable map (testable without
    /// touching the process environment)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("HUB_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let send_queue_depth = match vars.get("HUB_SEND_QUEUE_DEPTH") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "HUB_SEND_QUEUE_DEPTH".to_string(),
                value: value.clone(),
            })?,
            None => DEFAULT_SEND_QUEUE_DEPTH,
        };

        let hub_id = vars
            .get("HUB_ID")
            .cloned()
            .unwrap_or_else(|| format!("hub-{}", uuid::Uuid::new_v4().simple()));

        Ok(Self {
            bind_address,
            send_queue_depth,
            hub_id,
        })
    }
}
