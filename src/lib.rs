//! # zeromatch: zeroconf discovery and routing
//!
//! This library listens for multicast DNS service announcements on the local
//! network, turns each announced record into a validated [`ServiceInfo`],
//! and routes it to the consumers interested in it.
//!
//! ## Key Concepts
//!
//! - **`ZeroConfig`**: configuration, typically loaded from a TOML file. It
//!   lists match rules (service type plus optional glob filters on MAC
//!   address, name, manufacturer and model, routed to a consumer domain) and
//!   the HomeKit model table.
//!
//! - **`Dispatcher`**: owns the subscription to a [`ServiceListener`]. Every
//!   added or updated instance is resolved, normalized, classified and
//!   matched on its own task. Removals are ignored.
//!
//! - **HomeKit**: records of the `_hap` types are routed by their `md`
//!   model to an initial-pairing flow carrying the `sf` pairing status, in
//!   addition to the generic rules.
//!
//! - **`DiscoveryFlowHandler`**: implemented by the consumer side; receives
//!   one [`DiscoveryFlow`] per match, fire-and-forget.
//!
//! ## Quickstart Example
//!
//! ```no_run
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use tracing::info;
//! use zeromatch::{DiscoveryFlow, DiscoveryFlowHandler, ZeroConfig};
//!
//! struct Consumers;
//!
//! #[async_trait]
//! impl DiscoveryFlowHandler for Consumers {
//!     async fn create_flow(&self, flow: DiscoveryFlow) {
//!         info!("{:?} flow for {}: {}", flow.source, flow.domain, flow.info.name);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = ZeroConfig::load("path/to/your/config.toml")?;
//!     let mut discovery = zeromatch::start(&config, Arc::new(Consumers))?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     discovery.stop().await?;
//!     zeromatch::mdns::shutdown_shared_listener()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod glob;
pub mod homekit;
pub mod listener;
pub mod manager;
pub mod matcher;
pub mod mdns;
pub mod models;
pub mod normalize;

// Re-export public-facing components.
pub use config::ZeroConfig;
pub use error::DiscoveryError;
pub use events::{ChannelFlowHandler, DiscoveryFlowHandler};
pub use homekit::{HomeKitModel, HomeKitModels, PairingStatus};
pub use listener::{ServiceListener, UpdateHandler};
pub use manager::{Dispatcher, DispatcherState, start};
pub use matcher::{MatchRule, MatchTable, RuleFilters};
pub use models::{DiscoveryFlow, FlowSource, RawRecord, ServiceInfo, ServiceUpdate, StateChange};
