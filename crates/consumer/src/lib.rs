//! Partitioned event-stream consumer for eventflow.
//!
//! Reads envelopes from a multi-partition broker, processes every owned
//! partition concurrently, and multiplexes the decoded messages onto a single
//! channel. Each partition's progress is checkpointed after every batch.
//!
//! # Features
//!
//! - Per-partition workers: one task per owned partition, supervised by a coordinator
//! - In-band decode failures: undecodable items become error messages, not stream errors
//! - Checkpointing: the last item of every forwarded batch is committed
//! - Cooperative cancellation through a session handle
//! - Brokers: Kafka (consumer groups) and an in-memory broker
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use checkpoint::MemoryStore;
//! use eventflow_consumer::{MemoryBroker, Subscriber, SubscriberSettings};
//!
//! # async fn demo() -> eventflow_consumer::Result<()> {
//! let broker = MemoryBroker::new(2, Arc::new(MemoryStore::new()));
//! let subscriber = Subscriber::new(broker.clone(), SubscriberSettings::default());
//! let (mut messages, session) = subscriber.subscribe()?;
//!
//! while let Some(message) = messages.recv().await {
//!     println!("{}: {}", message.operation_id(), message.command());
//! }
//! let report = session.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Broker contract: processors hand out partition clients
pub mod broker;
pub mod config;
mod coordinator;
pub mod error;
pub mod kafka;
pub mod memory;

/// Consumption sessions: `subscribe`, cancellation and reports
pub mod session;

/// Receive, decode, forward, checkpoint loop for one partition
pub mod worker;

pub use broker::{PartitionClient, Processor, RawEvent};
pub use config::{parse_duration, SubscriberSettings};
pub use error::{Error, Result};
pub use kafka::{KafkaConfig, KafkaPartition, KafkaProcessor, KafkaPublisher};
pub use memory::{MemoryBroker, MemoryPartition};
pub use session::{SessionHandle, SessionReport, Subscriber};
pub use worker::{WorkerExit, WorkerReport};
