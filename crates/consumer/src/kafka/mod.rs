//! Kafka-backed broker.
//!
//! Partition ownership follows the consumer group: every partition the group
//! assigns to this consumer is split into its own queue and handed to the
//! engine as a [`KafkaPartition`]. Offsets are committed to the group, which
//! acts as the checkpoint store.

mod processor;
mod publisher;

pub use processor::{KafkaPartition, KafkaProcessor};
pub use publisher::KafkaPublisher;

use clap::Parser;
use eventflow_types::BrokerEndpoint;

use crate::config::{parse_duration, SubscriberSettings};
use crate::error::{Error, Result};

/// Configuration for the Kafka broker.
#[derive(Debug, Clone, Parser)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[clap(long, value_delimiter = ',', required = true, env = "EVENTFLOW_BROKERS")]
    pub brokers: Vec<String>,
    /// Consumer group ID
    #[clap(long, default_value = "eventflow-consumer", env = "EVENTFLOW_GROUP_ID")]
    pub group_id: String,
    /// Topic to consume from or publish to
    #[clap(long, env = "EVENTFLOW_TOPIC")]
    pub topic: String,
    /// Session timeout in milliseconds
    #[clap(long, default_value = "6000")]
    pub session_timeout_ms: String,
    /// Auto offset reset strategy ("earliest" or "latest")
    ///
    /// Applies only to partitions the group has never committed an offset for.
    #[clap(long, default_value = "earliest")]
    pub auto_offset_reset: String,
    /// Maximum number of messages requested per receive call
    #[clap(long, default_value_t = crate::config::DEFAULT_MAX_BATCH)]
    pub max_batch: usize,
    /// How long a partition waits for messages before polling again (e.g. "20s", "500ms")
    #[clap(long, default_value = "20s")]
    pub receive_wait: String,
    /// Capacity of the channel shared by all partitions
    #[clap(long, default_value_t = crate::config::DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,
}

impl KafkaConfig {
    pub fn new(brokers: Vec<String>, group_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers,
            group_id: group_id.into(),
            topic: topic.into(),
            session_timeout_ms: "6000".to_string(),
            auto_offset_reset: "earliest".to_string(),
            max_batch: crate::config::DEFAULT_MAX_BATCH,
            receive_wait: "20s".to_string(),
            channel_capacity: crate::config::DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint::new(self.brokers.clone(), &self.topic, &self.group_id)
    }

    pub fn subscriber_settings(&self) -> Result<SubscriberSettings> {
        let receive_wait = parse_duration(&self.receive_wait)
            .map_err(|e| Error::InvalidConfig(format!("receive_wait: {e:#}")))?;
        let settings = SubscriberSettings {
            receive_wait,
            max_batch: self.max_batch,
            channel_capacity: self.channel_capacity,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(Error::InvalidConfig("at least one broker is required".to_string()));
        }
        if self.topic.is_empty() {
            return Err(Error::InvalidConfig("topic is required".to_string()));
        }
        Ok(())
    }
}
