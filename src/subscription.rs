//! The live channel behind one panel slot
//!
//! A `DataSubscription` registers with the shared connection, waits for the
//! first page, then pumps incremental updates into the listener. In
//! time-series mode `start()` also slides the realtime window on a timer.
//!
//! State machine: `Idle -> Subscribed <-> Active`, terminal `Stopped`.
//! The stopped flag is checked before every callback, so events already
//! queued when `unsubscribe()` runs are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_channel::Receiver;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::listener::DataListener;
use crate::options::SubscriptionOptions;
use crate::transport::{SharedConnection, SubscriptionId, TransportErrorInfo, TransportEvent};
use crate::types::{
    DataGrid, DataSet, EntityData, EntityId, LoadResult, PageData, SubscriptionMode,
    SubscriptionTimewindow, TsValue,
};
use crate::utils::{now_ms, object_hash_hex};

/// Floor for the realtime tick period; `tokio::time::interval` rejects zero
const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Constructed, not yet asked to subscribe
    Idle,
    /// First page delivered
    Subscribed,
    /// Started; realtime ticking armed in time-series mode
    Active,
    /// Terminal
    Stopped,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::Idle => write!(f, "idle"),
            SubscriptionState::Subscribed => write!(f, "subscribed"),
            SubscriptionState::Active => write!(f, "active"),
            SubscriptionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Handle to a subscription. Clones share the same subscription.
#[derive(Clone)]
pub struct DataSubscription {
    inner: Arc<Inner>,
}

/// Current page and its cell grid
struct PageView {
    page: PageData<EntityData>,
    grid: DataGrid,
    rows: HashMap<EntityId, usize>,
}

impl PageView {
    fn empty() -> Self {
        Self {
            page: PageData::empty(),
            grid: Vec::new(),
            rows: HashMap::new(),
        }
    }
}

struct Inner {
    datasource_index: usize,
    connection: SharedConnection,
    listener: Arc<dyn DataListener>,
    config: FeedConfig,
    options: Mutex<SubscriptionOptions>,
    state: Mutex<SubscriptionState>,
    stopped: AtomicBool,
    subscribing: AtomicBool,
    deregistered: AtomicBool,
    /// Guarded by `state`: read and written only while the state lock is held
    start_requested: AtomicBool,
    id: Mutex<Option<SubscriptionId>>,
    view: Mutex<PageView>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DataSubscription {
    pub fn new(
        options: SubscriptionOptions,
        datasource_index: usize,
        listener: Arc<dyn DataListener>,
        connection: SharedConnection,
        config: FeedConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                datasource_index,
                connection,
                listener,
                config,
                options: Mutex::new(options),
                state: Mutex::new(SubscriptionState::Idle),
                stopped: AtomicBool::new(false),
                subscribing: AtomicBool::new(false),
                deregistered: AtomicBool::new(false),
                start_requested: AtomicBool::new(false),
                id: Mutex::new(None),
                view: Mutex::new(PageView::empty()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registration id, once registered
    pub fn id(&self) -> Option<SubscriptionId> {
        *self.inner.id.lock()
    }

    pub fn state(&self) -> SubscriptionState {
        *self.inner.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn datasource_index(&self) -> usize {
        self.inner.datasource_index
    }

    /// Snapshot of the request this subscription runs with
    pub fn options(&self) -> SubscriptionOptions {
        self.inner.options.lock().clone()
    }

    pub fn options_hash(&self) -> Result<i64> {
        self.inner.options.lock().hash_code()
    }

    /// Replace the subscription's own copy of the time window
    pub fn set_timewindow(&self, timewindow: Option<SubscriptionTimewindow>) {
        self.inner.options.lock().timewindow = timewindow;
    }

    /// Snapshot of the cell grid
    pub fn data(&self) -> DataGrid {
        self.inner.view.lock().grid.clone()
    }

    /// Register with the transport and wait for the first page.
    ///
    /// Only valid from `Idle`. Updates arriving before the first page are
    /// held back and delivered right after it.
    pub async fn subscribe(&self) -> Result<LoadResult> {
        {
            let state = self.inner.state.lock();
            if *state != SubscriptionState::Idle
                || self.inner.subscribing.swap(true, Ordering::SeqCst)
            {
                return Err(FeedError::InvalidState {
                    expected: "idle",
                    actual: state.to_string(),
                });
            }
        }

        let options = self.options();
        let (id, rx) = match self.inner.connection.register(&options).await {
            Ok(registered) => registered,
            Err(e) => {
                self.inner.stopped.store(true, Ordering::SeqCst);
                *self.inner.state.lock() = SubscriptionState::Stopped;
                return Err(e);
            }
        };
        *self.inner.id.lock() = Some(id);

        if self.is_stopped() {
            self.inner.release(id).await?;
            return Err(FeedError::Cancelled);
        }

        let timeout = self.inner.config.subscribe_timeout;
        let first = match tokio::time::timeout(timeout, self.inner.first_page(&rx)).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(timeout)),
        };

        let (page, pending) = match first {
            Ok(first) => first,
            Err(e) => {
                self.inner.fail(id).await;
                return Err(e);
            }
        };

        if self.is_stopped() {
            return Err(FeedError::Cancelled);
        }

        let grid = self.inner.load_page(page.clone());
        self.inner
            .listener
            .on_page_loaded(&page, &grid, self.inner.datasource_index);
        for updates in pending {
            self.inner.deliver_updates(updates);
        }

        let handle = tokio::spawn(pump(Arc::downgrade(&self.inner), rx));
        self.inner.tasks.lock().push(handle);

        let start_now = {
            let mut state = self.inner.state.lock();
            if *state != SubscriptionState::Idle {
                // Stopped while the page was being delivered.
                return Err(FeedError::Cancelled);
            }
            *state = SubscriptionState::Subscribed;
            self.inner.start_requested.swap(false, Ordering::SeqCst)
        };
        tracing::info!(
            options_hash = %object_hash_hex(&options).unwrap_or_default(),
            "Subscription {} loaded {} rows for datasource {}",
            id,
            grid.len(),
            self.inner.datasource_index
        );
        if start_now {
            self.start();
        }

        Ok(LoadResult {
            page_data: page,
            data: grid,
            datasource_index: self.inner.datasource_index,
        })
    }

    /// Begin realtime operation.
    ///
    /// Idempotent when active and a no-op once stopped. Called before the
    /// first page arrives, the start is remembered and applied after it.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                SubscriptionState::Stopped => {
                    tracing::debug!("start() on a stopped subscription ignored");
                    return;
                }
                SubscriptionState::Active => return,
                SubscriptionState::Idle => {
                    self.inner.start_requested.store(true, Ordering::SeqCst);
                    return;
                }
                SubscriptionState::Subscribed => *state = SubscriptionState::Active,
            }
        }

        let (mode, window) = {
            let options = self.inner.options.lock();
            (options.mode, options.timewindow.clone())
        };
        if mode != SubscriptionMode::TimeSeries {
            return;
        }
        match window {
            Some(window) if window.is_realtime() => self.arm_realtime(&window),
            _ => tracing::debug!("No realtime window, ticking not armed"),
        }
    }

    fn arm_realtime(&self, window: &SubscriptionTimewindow) {
        let interval_ms = window.aggregation.interval_ms.max(0) as u64;
        let period = Duration::from_millis(interval_ms)
            .max(self.inner.config.min_tick)
            .max(MIN_TICK_PERIOD);
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.stopped.load(Ordering::SeqCst) {
                    break;
                }
                inner.tick().await;
            }
        });
        self.inner.tasks.lock().push(handle);
        tracing::debug!("Realtime ticking armed every {:?}", period);
    }

    /// Stop the subscription. Calling it again is a no-op.
    pub async fn unsubscribe(&self) -> Result<()> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.inner.state.lock() = SubscriptionState::Stopped;
        self.inner.abort_tasks();

        let id = *self.inner.id.lock();
        if let Some(id) = id {
            self.inner.release(id).await?;
            tracing::info!("Subscription {} stopped", id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSubscription")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("datasource_index", &self.inner.datasource_index)
            .finish()
    }
}

impl Inner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Deregister exactly once
    async fn release(&self, id: SubscriptionId) -> Result<()> {
        if self.deregistered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connection.deregister(id).await
    }

    /// A subscribe attempt failed: stop and hand the registration back
    async fn fail(&self, id: SubscriptionId) {
        self.stopped.store(true, Ordering::SeqCst);
        *self.state.lock() = SubscriptionState::Stopped;
        if let Err(e) = self.release(id).await {
            tracing::warn!("Failed to release subscription {}: {}", id, e);
        }
    }

    fn abort_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    /// Wait for the first page, holding back updates that come before it
    async fn first_page(
        &self,
        rx: &Receiver<TransportEvent>,
    ) -> Result<(PageData<EntityData>, Vec<Vec<EntityData>>)> {
        let mut pending = Vec::new();
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(_) if self.is_stopped() => return Err(FeedError::Cancelled),
                Err(_) => {
                    return Err(FeedError::Transport(
                        "Channel closed before first page".into(),
                    ))
                }
            };
            if let Some(error) = event.error {
                return Err(transport_error(&error));
            }
            if let Some(updates) = event.updates {
                pending.push(updates);
            }
            if let Some(page) = event.page {
                return Ok((page, pending));
            }
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        if let Some(error) = &event.error {
            let err = transport_error(error);
            tracing::error!("Subscription {} transport error: {}", event.subscription_id, err);
            if !self.is_stopped() {
                self.listener.on_error(&err);
            }
        }
        if let Some(page) = event.page {
            let grid = self.load_page(page.clone());
            if !self.is_stopped() {
                self.listener
                    .on_page_loaded(&page, &grid, self.datasource_index);
            }
        }
        if let Some(updates) = event.updates {
            self.deliver_updates(updates);
        }
    }

    /// Replace the view with a new page and return its grid
    fn load_page(&self, page: PageData<EntityData>) -> DataGrid {
        let (mode, keys, window) = {
            let options = self.options.lock();
            let keys: Vec<String> = options.data_keys.iter().map(|k| k.name.clone()).collect();
            (options.mode, keys, options.timewindow.clone())
        };

        let mut rows = HashMap::with_capacity(page.data.len());
        let grid: DataGrid = page
            .data
            .iter()
            .enumerate()
            .map(|(row, entity)| {
                rows.insert(entity.entity_id.clone(), row);
                keys.iter()
                    .map(|key| {
                        let values = entity.values_for(key).unwrap_or_default();
                        DataSet::new(merge_values(mode, window.as_ref(), Vec::new(), values))
                    })
                    .collect()
            })
            .collect();

        let mut view = self.view.lock();
        view.page = page;
        view.grid = grid.clone();
        view.rows = rows;
        grid
    }

    /// Merge updates into the grid and notify per changed cell
    fn deliver_updates(&self, updates: Vec<EntityData>) {
        let (mode, keys, window) = {
            let options = self.options.lock();
            let keys: Vec<String> = options.data_keys.iter().map(|k| k.name.clone()).collect();
            (options.mode, keys, options.timewindow.clone())
        };

        let mut changed = Vec::new();
        {
            let mut view = self.view.lock();
            for entity in updates {
                let Some(&row) = view.rows.get(&entity.entity_id) else {
                    tracing::debug!(
                        "Update for {}/{} not on current page",
                        entity.entity_id.entity_type,
                        entity.entity_id.id
                    );
                    continue;
                };
                for (key_index, key) in keys.iter().enumerate() {
                    let Some(values) = entity.values_for(key) else {
                        continue;
                    };
                    let cell = &mut view.grid[row][key_index];
                    let merged = merge_values(mode, window.as_ref(), cell.data.clone(), values);
                    if merged == cell.data {
                        continue;
                    }
                    cell.data = merged;
                    changed.push((cell.clone(), row, key_index));
                }
            }
        }

        for (point, row, key_index) in changed {
            if self.is_stopped() {
                return;
            }
            self.listener
                .on_point_updated(&point, self.datasource_index, row, key_index);
        }
    }

    /// One realtime tick: slide the window, trim, tell the transport
    async fn tick(&self) {
        let window = match self.listener.realtime_window() {
            Some(window) => window,
            None => {
                let current = self.options.lock().timewindow.clone();
                match current {
                    Some(mut window) => {
                        window.advance(now_ms());
                        window
                    }
                    None => return,
                }
            }
        };

        self.options.lock().timewindow = Some(window.clone());
        self.listener.set_realtime_window(&window);
        {
            let mut view = self.view.lock();
            for cell in view.grid.iter_mut().flatten() {
                cell.data.retain(|v| window.contains(v.ts));
            }
        }

        let id = *self.id.lock();
        if let Some(id) = id {
            if let Err(e) = self.connection.update_window(id, &window).await {
                tracing::error!("Window update for subscription {} failed: {}", id, e);
                if !self.is_stopped() {
                    self.listener.on_error(&e);
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abort_tasks();
        if !self.is_stopped() {
            if let Some(id) = *self.id.lock() {
                tracing::warn!("Subscription {} dropped without unsubscribe", id);
                self.connection.detach(id);
            }
        }
    }
}

/// Deliver routed events until the queue closes or the subscription goes away
async fn pump(inner: Weak<Inner>, rx: Receiver<TransportEvent>) {
    while let Ok(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        if inner.is_stopped() {
            break;
        }
        inner.handle_event(event);
    }
}

fn transport_error(error: &TransportErrorInfo) -> FeedError {
    FeedError::Transport(format!("{} (code {})", error.message, error.code))
}

/// Fold incoming values into a cell.
///
/// Page snapshots keep only the newest value. Time series keep one value per
/// timestamp (later arrivals win), limited to the window and the
/// aggregation limit.
fn merge_values(
    mode: SubscriptionMode,
    window: Option<&SubscriptionTimewindow>,
    existing: Vec<TsValue>,
    incoming: Vec<TsValue>,
) -> Vec<TsValue> {
    match mode {
        SubscriptionMode::PageSnapshot => match incoming.into_iter().max_by_key(|v| v.ts) {
            Some(newest) => vec![newest],
            None => existing,
        },
        SubscriptionMode::TimeSeries => {
            let mut by_ts: BTreeMap<i64, serde_json::Value> = BTreeMap::new();
            for v in existing.into_iter().chain(incoming) {
                by_ts.insert(v.ts, v.value);
            }
            let mut merged: Vec<TsValue> = by_ts
                .into_iter()
                .map(|(ts, value)| TsValue { ts, value })
                .filter(|v| window.map_or(true, |w| w.contains(v.ts)))
                .collect();
            if let Some(w) = window {
                let limit = w.aggregation.limit as usize;
                if limit > 0 && merged.len() > limit {
                    merged.drain(..merged.len() - limit);
                }
            }
            merged
        }
    }
}
