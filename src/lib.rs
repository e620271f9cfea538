//! entity-feed - data-subscription coordinator for dashboard panels
//!
//! Turns a panel's datasource description into a live or one-shot feed over
//! a shared transport connection, and routes page loads and point updates
//! back to the panel in order.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod listener;
pub mod options;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod utils;

pub use config::FeedConfig;
pub use coordinator::{build_subscription_options, SubscriptionCoordinator};
pub use error::{FeedError, Result};
pub use listener::{DataListener, EntityDataListener};
pub use options::{SourceOptions, SubscriptionOptions};
pub use subscription::{DataSubscription, SubscriptionState};
pub use transport::{MemoryTransport, SharedConnection, SubscriptionId, Transport, TransportEvent};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
