//! Transport boundary and the shared connection multiplexed over it
//!
//! One logical connection carries every subscription. The connection
//! allocates subscription ids and routes the transport's push channel to a
//! bounded queue per subscription.

mod connection;
mod events;
mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::options::SubscriptionOptions;
use crate::types::SubscriptionTimewindow;

pub use connection::SharedConnection;
pub use events::{TransportErrorInfo, TransportEvent};
pub use memory::MemoryTransport;

/// Registration id; the multiplexing key on the shared connection
pub type SubscriptionId = u32;

/// The external transport the subscriptions talk through.
///
/// Implementations must tolerate repeated register/deregister for the same
/// logical listener. Retry and reconnection live here, not in the callers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register a subscription under a connection-allocated id
    async fn register(&self, id: SubscriptionId, options: &SubscriptionOptions) -> Result<()>;

    /// Drop a registration
    async fn deregister(&self, id: SubscriptionId) -> Result<()>;

    /// Move the realtime window of a registration
    async fn update_window(
        &self,
        _id: SubscriptionId,
        _window: &SubscriptionTimewindow,
    ) -> Result<()> {
        Ok(())
    }

    /// The push channel for every registration on this transport.
    ///
    /// The channel is multi-consumer; only the shared connection's router
    /// should read from it.
    fn events(&self) -> async_channel::Receiver<TransportEvent>;
}
