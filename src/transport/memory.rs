//! In-process transport
//!
//! Records every call and lets the owner push events by hand. Used by the
//! tests and by the replay tool to drive subscriptions without a server.

use async_channel::{bounded, Receiver, Sender};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SubscriptionId, Transport, TransportEvent};
use crate::error::{FeedError, Result};
use crate::options::SubscriptionOptions;
use crate::types::{EntityData, PageData, SubscriptionTimewindow};

const DEFAULT_CAPACITY: usize = 4096;

#[derive(Default)]
struct MemoryState {
    registrations: Vec<(SubscriptionId, SubscriptionOptions)>,
    deregistered: Vec<SubscriptionId>,
    window_updates: Vec<(SubscriptionId, SubscriptionTimewindow)>,
    /// Pushed to every new registration as its first page
    initial_page: Option<PageData<EntityData>>,
    fail_register: Option<String>,
    fail_deregister: Option<String>,
    deregister_calls: usize,
}

/// Transport backed by an in-memory channel
pub struct MemoryTransport {
    sender: Sender<TransportEvent>,
    receiver: Receiver<TransportEvent>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Answer every registration with this page
    pub fn with_initial_page(self, page: PageData<EntityData>) -> Self {
        self.state.lock().initial_page = Some(page);
        self
    }

    /// Make every following registration fail with `message`
    pub fn fail_registrations(&self, message: impl Into<String>) {
        self.state.lock().fail_register = Some(message.into());
    }

    /// Make every following deregistration fail with `message`
    pub fn fail_deregistrations(&self, message: impl Into<String>) {
        self.state.lock().fail_deregister = Some(message.into());
    }

    /// Push an event onto the shared channel
    pub async fn push(&self, event: TransportEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|e| FeedError::Transport(format!("Push channel closed: {}", e)))
    }

    pub async fn push_page(&self, id: SubscriptionId, page: PageData<EntityData>) -> Result<()> {
        self.push(TransportEvent::page(id, page)).await
    }

    pub async fn push_updates(&self, id: SubscriptionId, updates: Vec<EntityData>) -> Result<()> {
        self.push(TransportEvent::updates(id, updates)).await
    }

    /// Close the push channel, as a dropped connection would
    pub fn close(&self) {
        self.sender.close();
    }

    pub fn registrations(&self) -> Vec<(SubscriptionId, SubscriptionOptions)> {
        self.state.lock().registrations.clone()
    }

    pub fn registered_ids(&self) -> Vec<SubscriptionId> {
        self.state
            .lock()
            .registrations
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn last_registered_id(&self) -> Option<SubscriptionId> {
        self.state.lock().registrations.last().map(|(id, _)| *id)
    }

    pub fn deregistered_ids(&self) -> Vec<SubscriptionId> {
        self.state.lock().deregistered.clone()
    }

    /// Deregistration attempts, failed ones included
    pub fn deregister_calls(&self) -> usize {
        self.state.lock().deregister_calls
    }

    pub fn window_updates(&self) -> Vec<(SubscriptionId, SubscriptionTimewindow)> {
        self.state.lock().window_updates.clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn register(&self, id: SubscriptionId, options: &SubscriptionOptions) -> Result<()> {
        let initial_page = {
            let mut state = self.state.lock();
            if let Some(message) = &state.fail_register {
                return Err(FeedError::Transport(message.clone()));
            }
            state.registrations.push((id, options.clone()));
            state.initial_page.clone()
        };

        if let Some(page) = initial_page {
            self.push_page(id, page).await?;
        }
        Ok(())
    }

    async fn deregister(&self, id: SubscriptionId) -> Result<()> {
        let mut state = self.state.lock();
        state.deregister_calls += 1;
        if let Some(message) = &state.fail_deregister {
            return Err(FeedError::Transport(message.clone()));
        }
        state.deregistered.push(id);
        Ok(())
    }

    async fn update_window(
        &self,
        id: SubscriptionId,
        window: &SubscriptionTimewindow,
    ) -> Result<()> {
        self.state.lock().window_updates.push((id, window.clone()));
        Ok(())
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SourceOptions;
    use crate::types::SubscriptionMode;

    #[tokio::test]
    async fn test_initial_page_pushed_on_register() {
        let transport = MemoryTransport::new().with_initial_page(PageData::empty());
        let options = SubscriptionOptions {
            source: SourceOptions::Static,
            data_keys: vec![],
            mode: SubscriptionMode::PageSnapshot,
            is_latest: true,
            timewindow: None,
        };

        transport.register(9, &options).await.unwrap();

        let event = transport.events().recv().await.unwrap();
        assert_eq!(event.subscription_id, 9);
        assert_eq!(transport.registered_ids(), vec![9]);
        assert!(transport.registrations()[0].1.is_latest);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let transport = MemoryTransport::new();
        transport.fail_deregistrations("gone");
        assert!(matches!(
            transport.deregister(1).await,
            Err(FeedError::Transport(_))
        ));
        assert!(transport.deregistered_ids().is_empty());
        assert_eq!(transport.deregister_calls(), 1);
    }
}
