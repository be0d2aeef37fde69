//! Shared types for the checkout relay: wire protocol, catalog model,
//! logging and error types.
//!
//! This crate is used by both the gateway (server side) and the agents
//! (kiosk and phone side) so that both ends agree on JSON shapes.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod helpers;
pub mod protocol;

pub use catalog::{Catalog, Product};
pub use error::{Error, Result};
pub use protocol::*;

/// Install the fmt subscriber. `RUST_LOG` overrides `default_filter`,
/// which each binary sets to its own crate at `info`.
pub fn init_tracing_with_default(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}
