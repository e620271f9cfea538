//! Core types for entity-feed
//!
//! These mirror the dashboard's JSON configuration (camelCase on the wire)
//! and the data shapes the transport pushes back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subscription mode of a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionMode {
    /// One-shot page load of latest values
    #[default]
    PageSnapshot,
    /// Realtime streaming of a sliding time series
    TimeSeries,
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionMode::PageSnapshot => write!(f, "pageSnapshot"),
            SubscriptionMode::TimeSeries => write!(f, "timeSeries"),
        }
    }
}

// ============================================================================
// Datasource description
// ============================================================================

/// Identifier of a platform entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    pub entity_type: String,
    pub id: String,
}

impl EntityId {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

/// Server-side predicate selecting the entities that feed a datasource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EntityFilter {
    #[serde(rename_all = "camelCase")]
    SingleEntity { single_entity: EntityId },
    #[serde(rename_all = "camelCase")]
    EntityList {
        entity_type: String,
        entity_list: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    EntityType { entity_type: String },
    #[serde(rename_all = "camelCase")]
    EntityName {
        entity_type: String,
        entity_name_filter: String,
    },
}

/// Sort direction for entity queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Kind of key an entity query refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKeyType {
    Attribute,
    ClientAttribute,
    SharedAttribute,
    ServerAttribute,
    TimeSeries,
    EntityField,
    AlarmField,
}

/// A key inside an entity query (sort keys, key filters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    #[serde(rename = "type")]
    pub key_type: EntityKeyType,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOrder {
    pub key: EntityKey,
    #[serde(default)]
    pub direction: Direction,
}

/// Pagination, sort and search parameters for an entity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLink {
    #[serde(default)]
    pub page: u32,
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
}

impl PageLink {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            text_search: None,
            sort_order: None,
        }
    }

    /// Link to the following page
    pub fn next_page(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

/// Value type a key filter compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterValueType {
    String,
    Numeric,
    Boolean,
    DateTime,
}

/// Predicate over returned values, evaluated server-side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFilter {
    pub key: EntityKey,
    pub value_type: FilterValueType,
    /// Opaque to this crate; the query language lives on the server
    pub predicate: serde_json::Value,
}

/// Kind of a requested key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataKeyType {
    Timeseries,
    Attribute,
    Function,
    Alarm,
    EntityField,
}

/// A requested key as configured on a panel, UI metadata included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataKey {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: DataKeyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub settings: serde_json::Value,
    /// Script producing a derived value on the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_body: Option<String>,
    /// Script post-processing the received value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_func_body: Option<String>,
}

impl DataKey {
    pub fn new(name: impl Into<String>, key_type: DataKeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
            label: None,
            color: None,
            units: None,
            decimals: None,
            settings: serde_json::Value::Null,
            func_body: None,
            post_func_body: None,
        }
    }
}

/// A requested key stripped to what the subscription needs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDataKey {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: DataKeyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_func_body: Option<String>,
}

impl From<&DataKey> for SubscriptionDataKey {
    fn from(key: &DataKey) -> Self {
        Self {
            name: key.name.clone(),
            key_type: key.key_type,
            func_body: key.func_body.clone(),
            post_func_body: key.post_func_body.clone(),
        }
    }
}

/// Where a datasource's data comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Source {
    /// Entity query resolved and filtered on the server
    #[serde(rename = "entity", rename_all = "camelCase")]
    EntityFilter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity_filter: Option<EntityFilter>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_link: Option<PageLink>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        key_filters: Vec<KeyFilter>,
    },
    /// Static or function-generated series, no server-side filtering
    #[serde(rename = "function", alias = "static")]
    Static,
}

/// A configured source of data for one panel slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub source: Source,
    #[serde(default)]
    pub data_keys: Vec<DataKey>,
}

impl Datasource {
    /// Entity-filter datasource
    pub fn entity(
        entity_filter: Option<EntityFilter>,
        page_link: Option<PageLink>,
        data_keys: Vec<DataKey>,
    ) -> Self {
        Self {
            name: None,
            source: Source::EntityFilter {
                entity_filter,
                page_link,
                key_filters: Vec::new(),
            },
            data_keys,
        }
    }

    /// Static/function datasource
    pub fn function(data_keys: Vec<DataKey>) -> Self {
        Self {
            name: None,
            source: Source::Static,
            data_keys,
        }
    }

    pub fn is_entity_filter(&self) -> bool {
        matches!(self.source, Source::EntityFilter { .. })
    }

    /// Whether a subscription can be made with the given page link.
    ///
    /// Entity-filter sources need both a filter and a page link; static
    /// sources are always subscribable.
    pub fn is_subscribable_with(&self, page_link: Option<&PageLink>) -> bool {
        match &self.source {
            Source::EntityFilter { entity_filter, .. } => {
                entity_filter.is_some() && page_link.is_some()
            }
            Source::Static => true,
        }
    }

    /// Page link configured on the datasource itself
    pub fn page_link(&self) -> Option<&PageLink> {
        match &self.source {
            Source::EntityFilter { page_link, .. } => page_link.as_ref(),
            Source::Static => None,
        }
    }

    /// Key filters configured on the datasource itself
    pub fn key_filters(&self) -> &[KeyFilter] {
        match &self.source {
            Source::EntityFilter { key_filters, .. } => key_filters,
            Source::Static => &[],
        }
    }
}

// ============================================================================
// Time window
// ============================================================================

/// Aggregation applied by the server to time-series values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationType {
    #[default]
    None,
    Avg,
    Min,
    Max,
    Sum,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    /// Aggregation interval in milliseconds
    pub interval_ms: i64,
    /// Maximum number of points per key
    pub limit: u32,
    #[serde(rename = "type", default)]
    pub agg_type: AggregationType,
}

impl Default for Aggregation {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            limit: 200,
            agg_type: AggregationType::None,
        }
    }
}

/// Fixed history interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedWindow {
    pub start_ts: i64,
    pub end_ts: i64,
}

/// Realtime sliding interval plus aggregation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionTimewindow {
    pub start_ts: i64,
    /// Length of the sliding window; `None` for a fixed history window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime_window_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_window: Option<FixedWindow>,
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Align the window start to the aggregation interval
    #[serde(default)]
    pub tick_align: bool,
}

impl SubscriptionTimewindow {
    /// Realtime window of `window_ms` ending at `now_ms`
    pub fn realtime(window_ms: i64, interval_ms: i64, now_ms: i64) -> Self {
        let mut window = Self {
            start_ts: 0,
            realtime_window_ms: Some(window_ms),
            fixed_window: None,
            aggregation: Aggregation {
                interval_ms,
                ..Aggregation::default()
            },
            tick_align: false,
        };
        window.advance(now_ms);
        window
    }

    /// Fixed history window
    pub fn history(start_ts: i64, end_ts: i64) -> Self {
        Self {
            start_ts,
            realtime_window_ms: None,
            fixed_window: Some(FixedWindow { start_ts, end_ts }),
            aggregation: Aggregation::default(),
            tick_align: false,
        }
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime_window_ms.is_some()
    }

    /// Slide a realtime window so it ends at `now_ms`. Fixed windows are left alone.
    pub fn advance(&mut self, now_ms: i64) {
        let Some(window_ms) = self.realtime_window_ms else {
            return;
        };
        let mut start = now_ms - window_ms;
        let interval = self.aggregation.interval_ms;
        if self.tick_align && interval > 0 {
            start -= start.rem_euclid(interval);
        }
        self.start_ts = start;
    }

    pub fn end_ts(&self) -> Option<i64> {
        self.fixed_window.map(|w| w.end_ts)
    }

    /// Whether a timestamp falls inside the window
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start_ts && self.end_ts().map_or(true, |end| ts <= end)
    }
}

// ============================================================================
// Data delivered by the transport
// ============================================================================

/// A single timestamped value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsValue {
    pub ts: i64,
    pub value: serde_json::Value,
}

impl TsValue {
    pub fn new(ts: i64, value: impl Into<serde_json::Value>) -> Self {
        Self {
            ts,
            value: value.into(),
        }
    }
}

/// Values of one entity, keyed by key name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityData {
    pub entity_id: EntityId,
    #[serde(default)]
    pub latest: HashMap<String, TsValue>,
    #[serde(default)]
    pub timeseries: HashMap<String, Vec<TsValue>>,
}

impl EntityData {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            latest: HashMap::new(),
            timeseries: HashMap::new(),
        }
    }

    pub fn with_latest(mut self, key: impl Into<String>, value: TsValue) -> Self {
        self.latest.insert(key.into(), value);
        self
    }

    pub fn with_series(mut self, key: impl Into<String>, values: Vec<TsValue>) -> Self {
        self.timeseries.insert(key.into(), values);
        self
    }

    /// Values for `key`, series first, falling back to the latest value
    pub fn values_for(&self, key: &str) -> Option<Vec<TsValue>> {
        if let Some(series) = self.timeseries.get(key) {
            return Some(series.clone());
        }
        self.latest.get(key).map(|v| vec![v.clone()])
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    pub data: Vec<T>,
    pub total_pages: u32,
    pub total_elements: u64,
    pub has_next: bool,
}

impl<T> PageData<T> {
    pub fn single(data: Vec<T>) -> Self {
        let total = data.len() as u64;
        Self {
            data,
            total_pages: 1,
            total_elements: total,
            has_next: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            total_pages: 0,
            total_elements: 0,
            has_next: false,
        }
    }
}

/// Values of a single cell (one key of one entity)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSet {
    pub data: Vec<TsValue>,
}

impl DataSet {
    pub fn new(data: Vec<TsValue>) -> Self {
        Self { data }
    }

    pub fn latest(&self) -> Option<&TsValue> {
        self.data.last()
    }
}

/// Row-major grid of cells: `grid[row][key]`
pub type DataGrid = Vec<Vec<DataSet>>;

/// Outcome of the first page load of a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub page_data: PageData<EntityData>,
    pub data: DataGrid,
    pub datasource_index: usize,
}
