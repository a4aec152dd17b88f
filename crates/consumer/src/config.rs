//! Subscriber settings and duration parsing.

use std::time::Duration;

use anyhow::Context;

use crate::error::{Error, Result};

/// Default time a worker waits for a batch before re-polling.
pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_secs(20);

/// Default number of items requested per receive call.
pub const DEFAULT_MAX_BATCH: usize = 10;

/// Default capacity of the output channel shared by all partition workers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Tuning for a consumption session.
#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    /// How long each receive call waits for items
    pub receive_wait: Duration,
    /// Maximum number of items per receive call
    pub max_batch: usize,
    /// Capacity of the output channel
    ///
    /// A full channel blocks the partition worker trying to forward into it,
    /// which in turn stops that partition from receiving.
    pub channel_capacity: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            receive_wait: DEFAULT_RECEIVE_WAIT,
            max_batch: DEFAULT_MAX_BATCH,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SubscriberSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch == 0 {
            return Err(Error::InvalidConfig("max_batch must be at least 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.receive_wait.is_zero() {
            return Err(Error::InvalidConfig(
                "receive_wait must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string like "1h", "30m", "300s", "250ms", "300".
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Milliseconds suffix: "250ms"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    // Check for suffix, "ms" before "m" and "s"
    if let Some(num_str) = s.strip_suffix("ms") {
        let millis: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid milliseconds value: {num_str}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(num_str) = s.strip_suffix('h') {
        let hours: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid hours value: {num_str}"))?;
        let secs = hours
            .checked_mul(3600)
            .with_context(|| format!("Hours value out of range: {num_str}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(num_str) = s.strip_suffix('m') {
        let minutes: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid minutes value: {num_str}"))?;
        let secs = minutes
            .checked_mul(60)
            .with_context(|| format!("Minutes value out of range: {num_str}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(num_str) = s.strip_suffix('s') {
        let secs: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid seconds value: {num_str}"))?;
        return Ok(Duration::from_secs(secs));
    }

    // No suffix - treat as seconds
    s.parse::<u64>()
        .map(Duration::from_secs)
        .with_context(|| format!("Invalid duration value: {s}"))
}
