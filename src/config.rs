//! Runtime configuration for the coordinator and its shared connection

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// Tuning knobs for subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Capacity of each subscription's event queue. When full the router
    /// waits for the subscription to drain.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Capacity of the transport's shared push channel
    #[serde(default = "default_transport_buffer")]
    pub transport_buffer: usize,
    /// How long `subscribe()` waits for the first page
    #[serde(default = "default_subscribe_timeout", with = "millis")]
    pub subscribe_timeout: Duration,
    /// Lower bound for the realtime tick period
    #[serde(default = "default_min_tick", with = "millis")]
    pub min_tick: Duration,
}

fn default_event_buffer() -> usize {
    1024
}

fn default_transport_buffer() -> usize {
    4096
}

fn default_subscribe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_min_tick() -> Duration {
    Duration::from_millis(250)
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            transport_buffer: default_transport_buffer(),
            subscribe_timeout: default_subscribe_timeout(),
            min_tick: default_min_tick(),
        }
    }
}

impl FeedConfig {
    /// Build from `FEED_*` environment variables, defaulting whatever is unset
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_u64("FEED_EVENT_BUFFER")? {
            config.event_buffer = v as usize;
        }
        if let Some(v) = env_u64("FEED_TRANSPORT_BUFFER")? {
            config.transport_buffer = v as usize;
        }
        if let Some(v) = env_u64("FEED_SUBSCRIBE_TIMEOUT_MS")? {
            config.subscribe_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FEED_MIN_TICK_MS")? {
            config.min_tick = Duration::from_millis(v);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(FeedError::Config("event_buffer must be positive".into()));
        }
        if self.transport_buffer == 0 {
            return Err(FeedError::Config(
                "transport_buffer must be positive".into(),
            ));
        }
        if self.subscribe_timeout.is_zero() {
            return Err(FeedError::Config(
                "subscribe_timeout must be positive".into(),
            ));
        }
        if self.min_tick.is_zero() {
            return Err(FeedError::Config("min_tick must be positive".into()));
        }
        Ok(())
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_min_tick(mut self, tick: Duration) -> Self {
        self.min_tick = tick;
        self
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| FeedError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(FeedError::Config(format!("{}: {}", name, e))),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
