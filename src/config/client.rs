//! Client configuration types
//!
//! Defines the main configuration structures for the Muxtun client.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default local bind address for the TCP listener
fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Client configuration
    pub client: ClientConfig,
}

/// Client configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// DNS name or IPv4 address of the UDP upstream peer
    pub udp_upstream_host: String,

    /// UDP port of the upstream peer
    pub udp_upstream_port: u16,

    /// Local IPv4 address the TCP listener binds to
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Local TCP listen port
    pub listen_port: u16,

    /// Per-session TCP read timeout in seconds; zero or negative disables it
    #[serde(default)]
    pub tcp_read_timeout_s: i32,

    /// Per-session TCP write timeout in seconds; zero or negative disables it
    #[serde(default)]
    pub tcp_write_timeout_s: i32,
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.udp_upstream_host.is_empty() {
            return Err("udp_upstream_host must not be empty".to_string());
        }
        if self.udp_upstream_port == 0 {
            return Err("udp_upstream_port must not be 0".to_string());
        }
        if self.listen_port == 0 {
            return Err("listen_port must not be 0".to_string());
        }
        if self.listen_ip.parse::<Ipv4Addr>().is_err() {
            return Err(format!("listen_ip is not a valid IPv4 address: {}", self.listen_ip));
        }
        Ok(())
    }

    /// Parsed listener bind address
    pub fn listen_addr(&self) -> Result<(Ipv4Addr, u16), String> {
        let ip = self
            .listen_ip
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("listen_ip is not a valid IPv4 address: {}", self.listen_ip))?;
        Ok((ip, self.listen_port))
    }

    /// Session read timeout, if enabled
    pub fn read_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.tcp_read_timeout_s)
    }

    /// Session write timeout, if enabled
    pub fn write_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.tcp_write_timeout_s)
    }
}

fn timeout_from_secs(secs: i32) -> Option<Duration> {
    if secs > 0 {
        Some(Duration::from_secs(secs as u64))
    } else {
        None
    }
}
