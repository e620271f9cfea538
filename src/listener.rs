//! The consumer side of a subscription

use std::sync::Arc;

use crate::error::FeedError;
use crate::subscription::DataSubscription;
use crate::types::{
    DataSet, Datasource, EntityData, PageData, SubscriptionMode, SubscriptionTimewindow,
};

/// Callbacks a panel implements to receive data.
///
/// Callbacks run on the subscription's pump task and must not block.
pub trait DataListener: Send + Sync {
    /// A full page replaced whatever the panel held
    fn on_page_loaded(&self, page: &PageData<EntityData>, data: &[Vec<DataSet>], datasource_index: usize);

    /// One cell changed
    fn on_point_updated(
        &self,
        point: &DataSet,
        datasource_index: usize,
        row_index: usize,
        key_index: usize,
    );

    /// A failure after streaming began
    fn on_error(&self, error: &FeedError) {
        tracing::warn!("Subscription error: {}", error);
    }

    /// Current realtime window as the panel sees it, if the panel drives it
    fn realtime_window(&self) -> Option<SubscriptionTimewindow> {
        None
    }

    /// Told whenever the subscription slides its window
    fn set_realtime_window(&self, _window: &SubscriptionTimewindow) {}
}

/// What a panel slot wants, plus the one subscription serving it
pub struct EntityDataListener {
    pub mode: SubscriptionMode,
    pub timewindow: Option<SubscriptionTimewindow>,
    pub datasource: Datasource,
    pub datasource_index: usize,
    pub callbacks: Arc<dyn DataListener>,
    pub(crate) subscription: Option<DataSubscription>,
}

impl EntityDataListener {
    pub fn new(
        mode: SubscriptionMode,
        datasource: Datasource,
        datasource_index: usize,
        callbacks: Arc<dyn DataListener>,
    ) -> Self {
        Self {
            mode,
            timewindow: None,
            datasource,
            datasource_index,
            callbacks,
            subscription: None,
        }
    }

    pub fn with_timewindow(mut self, timewindow: SubscriptionTimewindow) -> Self {
        self.timewindow = Some(timewindow);
        self
    }

    /// The subscription currently held, if any
    pub fn subscription(&self) -> Option<&DataSubscription> {
        self.subscription.as_ref()
    }

    /// Whether the slot holds a subscription that has not been stopped
    pub fn has_live_subscription(&self) -> bool {
        self.subscription
            .as_ref()
            .map_or(false, |s| !s.is_stopped())
    }
}

impl std::fmt::Debug for EntityDataListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDataListener")
            .field("mode", &self.mode)
            .field("timewindow", &self.timewindow)
            .field("datasource", &self.datasource)
            .field("datasource_index", &self.datasource_index)
            .field("subscription", &self.subscription.as_ref().map(|s| s.id()))
            .finish()
    }
}
