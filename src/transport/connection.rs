//! Shared connection: one transport, many subscriptions

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::{SubscriptionId, Transport, TransportEvent};
use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::options::SubscriptionOptions;
use crate::types::SubscriptionTimewindow;

type Routes = Arc<DashMap<SubscriptionId, Sender<TransportEvent>>>;

/// The connection-pool-of-one every subscription shares.
///
/// Cloning is cheap; all clones route through the same router task, which is
/// aborted when the last clone is dropped.
#[derive(Clone)]
pub struct SharedConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    routes: Routes,
    next_id: AtomicU32,
    event_buffer: usize,
    router: JoinHandle<()>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.router.abort();
    }
}

impl SharedConnection {
    /// Wrap a transport and start routing its push channel.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: &FeedConfig) -> Self {
        let routes: Routes = Arc::new(DashMap::new());
        let router = tokio::spawn(route_events(transport.events(), routes.clone()));

        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                routes,
                next_id: AtomicU32::new(1),
                event_buffer: config.event_buffer.max(1),
                router,
            }),
        }
    }

    /// Register a subscription and open its event queue.
    ///
    /// The route exists before the transport hears about the id, so the
    /// first page cannot race past it.
    pub async fn register(
        &self,
        options: &SubscriptionOptions,
    ) -> Result<(SubscriptionId, Receiver<TransportEvent>)> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = bounded(self.inner.event_buffer);
        self.inner.routes.insert(id, tx);

        if let Err(e) = self.inner.transport.register(id, options).await {
            self.detach(id);
            tracing::error!("Registration of subscription {} failed: {}", id, e);
            return Err(match e {
                FeedError::Transport(message) => FeedError::Registration { id, message },
                other => other,
            });
        }

        tracing::debug!("Registered subscription {}", id);
        Ok((id, rx))
    }

    /// Drop the route for `id` and close its queue. Returns whether a route existed.
    pub fn detach(&self, id: SubscriptionId) -> bool {
        match self.inner.routes.remove(&id) {
            Some((_, tx)) => {
                tx.close();
                true
            }
            None => false,
        }
    }

    /// Detach and tell the transport to forget the registration
    pub async fn deregister(&self, id: SubscriptionId) -> Result<()> {
        self.detach(id);
        self.inner.transport.deregister(id).await?;
        tracing::debug!("Deregistered subscription {}", id);
        Ok(())
    }

    pub async fn update_window(
        &self,
        id: SubscriptionId,
        window: &SubscriptionTimewindow,
    ) -> Result<()> {
        self.inner.transport.update_window(id, window).await
    }

    /// Number of subscriptions with an open route
    pub fn route_count(&self) -> usize {
        self.inner.routes.len()
    }

    pub fn is_routed(&self, id: SubscriptionId) -> bool {
        self.inner.routes.contains_key(&id)
    }
}

/// Forward pushes to their subscription's queue until the transport closes.
///
/// A full queue makes the router wait; events are never dropped for a live
/// route, so per-subscription order is the transport's order.
async fn route_events(events: Receiver<TransportEvent>, routes: Routes) {
    while let Ok(event) = events.recv().await {
        let id = event.subscription_id;
        // Clone the sender out so the map shard is not held across the await.
        let route = routes.get(&id).map(|entry| entry.value().clone());
        match route {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    tracing::debug!("Subscription {} closed, dropping event", id);
                }
            }
            None => tracing::debug!("No route for subscription {}, dropping event", id),
        }
    }
    tracing::info!("Transport push channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SourceOptions;
    use crate::transport::MemoryTransport;
    use crate::types::{PageData, SubscriptionMode};

    fn options() -> SubscriptionOptions {
        SubscriptionOptions {
            source: SourceOptions::Static,
            data_keys: vec![],
            mode: SubscriptionMode::PageSnapshot,
            is_latest: false,
            timewindow: None,
        }
    }

    #[tokio::test]
    async fn test_routes_by_subscription_id() {
        let transport = Arc::new(MemoryTransport::new());
        let conn = SharedConnection::new(transport.clone(), &FeedConfig::default());

        let (a, rx_a) = conn.register(&options()).await.unwrap();
        let (b, rx_b) = conn.register(&options()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(conn.route_count(), 2);

        transport.push(TransportEvent::page(b, PageData::empty())).await.unwrap();
        transport.push(TransportEvent::error(a, 500, "boom")).await.unwrap();

        let got_b = rx_b.recv().await.unwrap();
        assert_eq!(got_b.subscription_id, b);
        assert!(got_b.page.is_some());
        let got_a = rx_a.recv().await.unwrap();
        assert_eq!(got_a.error.unwrap().code, 500);
    }

    #[tokio::test]
    async fn test_failed_registration_leaves_no_route() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_registrations("socket closed");
        let conn = SharedConnection::new(transport.clone(), &FeedConfig::default());

        let err = conn.register(&options()).await.unwrap_err();
        assert!(matches!(err, FeedError::Registration { .. }));
        assert_eq!(conn.route_count(), 0);
    }

    #[tokio::test]
    async fn test_deregister_closes_queue() {
        let transport = Arc::new(MemoryTransport::new());
        let conn = SharedConnection::new(transport.clone(), &FeedConfig::default());

        let (id, rx) = conn.register(&options()).await.unwrap();
        conn.deregister(id).await.unwrap();

        assert!(rx.is_closed());
        assert!(!conn.is_routed(id));
        assert_eq!(transport.deregistered_ids(), vec![id]);
    }
}
