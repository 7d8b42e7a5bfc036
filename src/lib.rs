//! # Muxtun - TCP-over-reliable-UDP Tunnel Client
//!
//! Muxtun accepts local TCP connections and multiplexes them onto a single
//! reliable-UDP conversation toward a remote server, which demultiplexes
//! each logical stream to its real destination. Reliability, ordering, and
//! retransmission come from a KCP conversation negotiated at startup.
//!
//! ## Features
//!
//! - **Single Conversation**: all local connections share one tuned KCP
//!   session (256-segment windows, nodelay mode, no congestion control)
//! - **Cheap Multiplexing**: 4-byte frame headers with 16-bit per-stream
//!   indices; control frames share the stream
//! - **Clocked Engine**: a 10 ms update tick plus immediate updates after
//!   any send or input keeps latency flat under bursty traffic
//! - **Graceful Shutdown**: close frames are announced upstream and given
//!   a 3-second drain before the process exits
//!
//! ## Usage
//!
//! ```rust,ignore
//! use muxtun::config::load_config;
//! use muxtun::client::run_client;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_client(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TCP clients -> listener -> mux loop -> KCP engine -> UDP -> server
//! ```
//!
//! The mux loop is one task owning every piece of state; sessions talk to
//! it through channels, so no locks exist anywhere in the data path.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod helper;
pub mod protocol;

// Re-export commonly used items
pub use client::{run_client, TunnelClient};
pub use config::{load_config, Config};
pub use error::{FrameError, MuxtunError};

/// Version of the Muxtun library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
