//! Server configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration
///
/// Defaults match the historically fixed constants of the deployed game
/// (loopback, port 8000); binaries override them from command-line flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the listener
    pub bind_address: SocketAddr,
    /// Database URL handed to the store
    pub database_url: String,
    /// Maximum concurrent sessions; further connections are refused
    pub max_clients: usize,
    /// A session idle longer than this is closed
    pub read_timeout: Duration,
    /// Consecutive failed logins before the connection is dropped
    pub max_login_failures: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".parse().unwrap(),
            database_url: "sqlite:leviathan.db".to_string(),
            max_clients: 64,
            read_timeout: Duration::from_secs(300),
            max_login_failures: 5,
        }
    }
}
