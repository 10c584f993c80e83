//! Teonet L0 client host: tokio transports and the event loop around `teol0-core`.

pub mod client;
pub mod config;
pub mod logging;
pub mod transport;

pub use client::{ClientError, ClientHandle, ClientSettings, L0Client};
pub use config::Config;
