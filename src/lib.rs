//! Knockgate - an HTTP-gated TCP access broker
//!
//! A client "knocks" with an HTTP request on a configured route and gets back
//! the number of a freshly opened TCP port. That port only relays connections
//! coming from the knocking IP, forwarding raw bytes to the backend tied to the
//! route. Everything else is answered slowly or not at all:
//! - connections to an open port from any other IP are dropped
//! - unknown routes are held open by a tarpit that drips a byte per second
//! - `/robots.txt` asks crawlers to stay away
//! - idle ports close after a short accept timeout

pub mod cli;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod logging;
pub mod relay;
pub mod tarpit;
pub mod tls;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
