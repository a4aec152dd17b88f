use std::time::Duration;

use eventflow_types::Message;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;

use super::KafkaConfig;
use crate::error::{Error, Result};

/// Publishes envelopes to a Kafka topic.
pub struct KafkaPublisher {
    producer: FutureProducer,
    brokers: String,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        config.validate()?;
        let brokers = config.brokers.join(",");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| Error::Consumer(format!("Failed to create Kafka producer: {e}")))?;

        Ok(Self {
            producer,
            brokers,
            topic: config.topic.clone(),
        })
    }

    /// Create the topic if it doesn't exist.
    pub async fn ensure_topic(&self, partitions: i32) -> Result<()> {
        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| Error::Consumer(format!("Failed to create admin client: {e}")))?;

        let new_topic = NewTopic::new(&self.topic, partitions, TopicReplication::Fixed(1));
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

        let results = admin_client.create_topics(&[new_topic], &opts).await?;
        for result in results {
            match result {
                Ok(topic_name) => tracing::info!("Topic '{topic_name}' created successfully"),
                Err((topic_name, err)) if err.to_string().contains("already exists") => {
                    tracing::info!("Topic '{topic_name}' already exists")
                }
                Err((topic_name, err)) => {
                    return Err(Error::Consumer(format!(
                        "Failed to create topic '{topic_name}': {err}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Publish a message, keyed by its operation id.
    ///
    /// A message without an operation id is sent with a fresh one; the caller's
    /// message is left untouched.
    pub async fn publish(&self, message: &Message) -> Result<()> {
        let message = message.with_operation_id_or_new();
        let payload = message.serialize()?;

        let record = FutureRecord::to(&self.topic)
            .key(message.operation_id())
            .payload(&payload);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| Error::PublishFailed(err.to_string()))?;

        tracing::debug!(
            operation_id = %message.operation_id(),
            topic = %self.topic,
            "Published message"
        );
        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
