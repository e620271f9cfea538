//! Feed replay
//!
//! Drives panel subscriptions from a JSON scenario over the in-memory
//! transport and prints every delivered callback as one JSON line.
//!
//! ```json
//! {
//!   "initialPage": { "data": [...], "totalPages": 1, "totalElements": 1, "hasNext": false },
//!   "panels": [{ "datasource": {...}, "mode": "timeSeries", "timewindow": {...} }],
//!   "events": [{ "panel": 0, "delayMs": 50, "updates": [...] }]
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entity_feed::{
    utils::now_ms, DataListener, DataSet, Datasource, EntityData, EntityDataListener,
    FeedConfig, FeedError, MemoryTransport, PageData, SubscriptionCoordinator, SubscriptionMode,
    SubscriptionTimewindow, TransportEvent,
};

#[derive(Parser)]
#[command(name = "feed-replay")]
#[command(about = "Replay a scripted transport session against panel subscriptions")]
#[command(version)]
struct Args {
    /// Scenario file
    scenario: PathBuf,

    /// Emit logs as JSON
    #[arg(long, env = "FEED_JSON_LOGS")]
    json_logs: bool,

    /// Milliseconds to wait after the last event before stopping
    #[arg(long, default_value = "200")]
    settle_ms: u64,

    /// Leave subscriptions unstarted after the first page (no realtime ticks)
    #[arg(long)]
    no_start: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scenario {
    #[serde(default)]
    initial_page: Option<PageData<EntityData>>,
    panels: Vec<Panel>,
    #[serde(default)]
    events: Vec<ScriptedEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Panel {
    datasource: Datasource,
    #[serde(default)]
    mode: SubscriptionMode,
    #[serde(default)]
    timewindow: Option<SubscriptionTimewindow>,
}

/// One push from the script; the registration id is filled in at replay time
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptedEvent {
    panel: usize,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    page: Option<PageData<EntityData>>,
    #[serde(default)]
    updates: Option<Vec<EntityData>>,
    #[serde(default)]
    error: Option<String>,
}

impl ScriptedEvent {
    fn into_event(self) -> TransportEvent {
        // Addressed to 0 until readdressed to the panel's registration
        match (self.error, self.page, self.updates) {
            (Some(message), _, _) => TransportEvent::error(0, 500, message),
            (None, Some(page), _) => TransportEvent::page(0, page),
            (None, None, updates) => TransportEvent::updates(0, updates.unwrap_or_default()),
        }
    }
}

/// Prints callbacks for one panel to stdout
struct Printer {
    panel: usize,
}

impl Printer {
    fn emit(&self, line: serde_json::Value) {
        println!("{}", line);
    }
}

impl DataListener for Printer {
    fn on_page_loaded(
        &self,
        page: &PageData<EntityData>,
        data: &[Vec<DataSet>],
        datasource_index: usize,
    ) {
        self.emit(json!({
            "panel": self.panel,
            "callback": "pageLoaded",
            "datasourceIndex": datasource_index,
            "totalElements": page.total_elements,
            "data": data,
        }));
    }

    fn on_point_updated(
        &self,
        point: &DataSet,
        datasource_index: usize,
        row_index: usize,
        key_index: usize,
    ) {
        self.emit(json!({
            "panel": self.panel,
            "callback": "pointUpdated",
            "datasourceIndex": datasource_index,
            "row": row_index,
            "key": key_index,
            "point": point,
        }));
    }

    fn on_error(&self, error: &FeedError) {
        self.emit(json!({
            "panel": self.panel,
            "callback": "error",
            "code": error.code(),
            "message": error.to_string(),
        }));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let raw = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("Failed to read scenario {}", args.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw).context("Invalid scenario")?;
    if scenario.panels.is_empty() {
        bail!("Scenario has no panels");
    }

    let config = FeedConfig::from_env()?;

    let mut transport = MemoryTransport::with_capacity(config.transport_buffer);
    if let Some(page) = scenario.initial_page {
        transport = transport.with_initial_page(page);
    }
    let transport = Arc::new(transport);
    let coordinator = SubscriptionCoordinator::new(transport.clone(), config);

    let now = now_ms();
    let mut listeners: Vec<EntityDataListener> = scenario
        .panels
        .into_iter()
        .enumerate()
        .map(|(index, panel)| {
            let mut listener = EntityDataListener::new(
                panel.mode,
                panel.datasource,
                index,
                Arc::new(Printer { panel: index }),
            );
            listener.timewindow = panel.timewindow.map(|mut window| {
                window.advance(now);
                window
            });
            listener
        })
        .collect();

    let prepared = join_all(
        listeners
            .iter_mut()
            .map(|listener| coordinator.prepare_subscription(listener)),
    )
    .await;
    for (index, outcome) in prepared.into_iter().enumerate() {
        match outcome {
            Ok(Some(_)) => tracing::info!("Panel {} subscribed", index),
            Ok(None) => tracing::warn!("Panel {} is not subscribable, skipped", index),
            Err(e) => tracing::error!("Panel {} failed to subscribe: {}", index, e),
        }
    }

    if !args.no_start {
        for listener in listeners.iter().filter(|l| l.has_live_subscription()) {
            coordinator.start_subscription(listener)?;
        }
    }

    for scripted in scenario.events {
        if scripted.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(scripted.delay_ms)).await;
        }
        let panel = scripted.panel;
        let Some(id) = listeners
            .get(panel)
            .and_then(|l| l.subscription())
            .and_then(|s| s.id())
        else {
            tracing::warn!("Event for panel {} has no registration, dropped", panel);
            continue;
        };
        transport.push(scripted.into_event().readdressed(id)).await?;
    }

    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;

    for listener in listeners.iter_mut() {
        coordinator.stop_subscription(listener).await?;
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .with(filter)
            .init();
    }
}
