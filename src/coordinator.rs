//! Entry point for panel code
//!
//! The coordinator decides whether a listener is subscribable, builds the
//! normalized request, and hands subscriptions in and out of the listener's
//! single slot. A live subscription must be stopped before the slot takes a
//! new one; the coordinator never unsubscribes implicitly.

use std::sync::Arc;

use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::listener::EntityDataListener;
use crate::options::{SourceOptions, SubscriptionOptions};
use crate::subscription::DataSubscription;
use crate::transport::{SharedConnection, Transport};
use crate::types::{
    KeyFilter, LoadResult, PageLink, Source, SubscriptionDataKey, SubscriptionMode,
};

/// Creates, starts and stops subscriptions over one shared connection
#[derive(Clone)]
pub struct SubscriptionCoordinator {
    connection: SharedConnection,
    config: FeedConfig,
}

impl SubscriptionCoordinator {
    /// Coordinator over a fresh shared connection to `transport`
    pub fn new(transport: Arc<dyn Transport>, config: FeedConfig) -> Self {
        let connection = SharedConnection::new(transport, &config);
        Self { connection, config }
    }

    /// Coordinator over an existing shared connection
    pub fn with_connection(connection: SharedConnection, config: FeedConfig) -> Self {
        Self { connection, config }
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Config-time entry: subscribe with the datasource's own page link and
    /// key filters and wait for the first page.
    ///
    /// Returns `Ok(None)` without creating anything when the datasource is
    /// not subscribable yet.
    pub async fn prepare_subscription(
        &self,
        listener: &mut EntityDataListener,
    ) -> Result<Option<LoadResult>> {
        let page_link = listener.datasource.page_link().cloned();
        if !listener.datasource.is_subscribable_with(page_link.as_ref()) {
            tracing::debug!(
                "Datasource {} not subscribable, skipping",
                listener.datasource_index
            );
            return Ok(None);
        }
        ensure_slot_free(listener)?;

        let key_filters = listener.datasource.key_filters().to_vec();
        let options =
            build_subscription_options(listener, page_link.as_ref(), &key_filters, false);
        let subscription = self.create_subscription(listener, options);
        listener.subscription = Some(subscription.clone());

        subscription.subscribe().await.map(Some)
    }

    /// Start the stored subscription.
    ///
    /// In time-series mode the listener's current window is copied into the
    /// subscription first, so later edits to the listener do not reach it.
    pub fn start_subscription(&self, listener: &EntityDataListener) -> Result<()> {
        let subscription = listener
            .subscription
            .as_ref()
            .ok_or(FeedError::NoSubscription)?;
        if listener.mode == SubscriptionMode::TimeSeries {
            subscription.set_timewindow(listener.timewindow.clone());
        }
        subscription.start();
        Ok(())
    }

    /// Refresh entry for page link or key filter changes.
    ///
    /// Subscribes in the background; failures reach the listener through
    /// `on_error`. Returns whether a subscription was created.
    pub fn subscribe_for_latest_data(
        &self,
        listener: &mut EntityDataListener,
        page_link: Option<PageLink>,
        key_filters: Vec<KeyFilter>,
    ) -> Result<bool> {
        if !listener.datasource.is_subscribable_with(page_link.as_ref()) {
            tracing::debug!(
                "Datasource {} not subscribable with supplied page link, skipping",
                listener.datasource_index
            );
            return Ok(false);
        }
        ensure_slot_free(listener)?;

        let options =
            build_subscription_options(listener, page_link.as_ref(), &key_filters, true);
        let subscription = self.create_subscription(listener, options);
        listener.subscription = Some(subscription.clone());

        let callbacks = listener.callbacks.clone();
        tokio::spawn(async move {
            if let Err(e) = subscription.subscribe().await {
                if !matches!(e, FeedError::Cancelled) {
                    tracing::error!("Latest-data subscription failed: {}", e);
                    callbacks.on_error(&e);
                }
            }
        });
        Ok(true)
    }

    /// Take the stored subscription out of the slot and stop it.
    ///
    /// With nothing stored this is a no-op, so repeated teardown is harmless.
    pub async fn stop_subscription(&self, listener: &mut EntityDataListener) -> Result<()> {
        match listener.subscription.take() {
            Some(subscription) => subscription.unsubscribe().await,
            None => {
                tracing::debug!(
                    "stop_subscription on datasource {} with no subscription",
                    listener.datasource_index
                );
                Ok(())
            }
        }
    }

    fn create_subscription(
        &self,
        listener: &EntityDataListener,
        options: SubscriptionOptions,
    ) -> DataSubscription {
        DataSubscription::new(
            options,
            listener.datasource_index,
            listener.callbacks.clone(),
            self.connection.clone(),
            self.config.clone(),
        )
    }
}

/// The slot may take a new subscription only when empty or stopped
fn ensure_slot_free(listener: &EntityDataListener) -> Result<()> {
    if listener.has_live_subscription() {
        return Err(FeedError::SubscriptionActive);
    }
    Ok(())
}

/// Build the normalized request for a listener.
///
/// Keys keep only name, type and the two scripts. Filter, page link and key
/// filters are attached for entity-filter sources only.
pub fn build_subscription_options(
    listener: &EntityDataListener,
    page_link: Option<&PageLink>,
    key_filters: &[KeyFilter],
    is_latest: bool,
) -> SubscriptionOptions {
    let datasource = &listener.datasource;
    let data_keys: Vec<SubscriptionDataKey> = datasource
        .data_keys
        .iter()
        .map(SubscriptionDataKey::from)
        .collect();

    let source = match (&datasource.source, page_link) {
        (
            Source::EntityFilter {
                entity_filter: Some(entity_filter),
                ..
            },
            Some(page_link),
        ) => SourceOptions::EntityFilter {
            entity_filter: entity_filter.clone(),
            page_link: page_link.clone(),
            key_filters: key_filters.to_vec(),
        },
        // Callers check subscribability first; an incomplete entity source
        // has nothing the transport could honor.
        (Source::EntityFilter { .. }, _) | (Source::Static, _) => SourceOptions::Static,
    };

    SubscriptionOptions {
        source,
        data_keys,
        mode: listener.mode,
        is_latest,
        timewindow: listener.timewindow.clone(),
    }
}
