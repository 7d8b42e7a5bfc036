//! Client module
//!
//! Contains the tunnel client: setup, the mux event loop, and per-session
//! state.

mod client;
mod event_loop;
mod session;

pub use client::TunnelClient;

use crate::config::Config;
use anyhow::Result;
use tokio::sync::broadcast;

/// Set up and run the tunnel client until shutdown
///
/// Convenience wrapper: a setup failure (socket, resolution, handshake,
/// listener) is returned before serving starts.
pub async fn run_client(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    let client = TunnelClient::setup(config.client).await?;
    client.run(shutdown_rx).await
}
