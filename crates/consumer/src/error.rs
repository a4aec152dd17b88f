use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error(transparent)]
    Envelope(#[from] eventflow_types::Error),

    #[error("Partition {partition} closed")]
    PartitionClosed { partition: String },

    #[error("Receive failed on partition {partition}: {message}")]
    ReceiveFailed { partition: String, message: String },

    #[error("Checkpoint failed on partition {partition}: {message}")]
    CheckpointFailed { partition: String, message: String },

    #[error("Broker run loop failed: {0}")]
    RunLoopFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
