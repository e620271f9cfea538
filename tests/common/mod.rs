//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use entity_feed::{
    DataKey, DataKeyType, DataListener, DataSet, Datasource, EntityData, EntityDataListener,
    EntityFilter, EntityId, FeedError, PageData, PageLink, SubscriptionMode,
    SubscriptionTimewindow, TsValue,
};

/// One observed callback
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    PageLoaded { rows: usize, datasource_index: usize },
    PointUpdated { row: usize, key: usize, value: serde_json::Value },
    Error(String),
}

/// Listener that records every callback in order
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Error(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

impl DataListener for Recorder {
    fn on_page_loaded(
        &self,
        page: &PageData<EntityData>,
        _data: &[Vec<DataSet>],
        datasource_index: usize,
    ) {
        self.calls.lock().push(Call::PageLoaded {
            rows: page.data.len(),
            datasource_index,
        });
    }

    fn on_point_updated(&self, point: &DataSet, _: usize, row: usize, key: usize) {
        let value = point.latest().map(|v| v.value.clone()).unwrap_or_default();
        self.calls.lock().push(Call::PointUpdated { row, key, value });
    }

    fn on_error(&self, error: &FeedError) {
        self.calls.lock().push(Call::Error(error.to_string()));
    }
}

pub fn dev1() -> EntityId {
    EntityId::new("device", "dev-1")
}

pub fn temperature_key() -> DataKey {
    DataKey::new("temperature", DataKeyType::Timeseries)
}

pub fn device_datasource() -> Datasource {
    Datasource::entity(
        Some(EntityFilter::SingleEntity {
            single_entity: dev1(),
        }),
        Some(PageLink::new(0, 10)),
        vec![temperature_key()],
    )
}

pub fn device_page() -> PageData<EntityData> {
    device_page_at(1_000)
}

pub fn device_page_at(ts: i64) -> PageData<EntityData> {
    PageData::single(vec![
        EntityData::new(dev1()).with_latest("temperature", TsValue::new(ts, 21.0))
    ])
}

pub fn temperature_update(ts: i64, value: f64) -> Vec<EntityData> {
    vec![EntityData::new(dev1()).with_latest("temperature", TsValue::new(ts, value))]
}

pub fn listener(
    mode: SubscriptionMode,
    datasource: Datasource,
    index: usize,
    recorder: &Arc<Recorder>,
) -> EntityDataListener {
    EntityDataListener::new(mode, datasource, index, recorder.clone())
}

pub fn realtime_window() -> SubscriptionTimewindow {
    SubscriptionTimewindow::realtime(60_000, 1_000, chrono::Utc::now().timestamp_millis())
}

/// Poll until `cond` holds, failing the test after two seconds
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
