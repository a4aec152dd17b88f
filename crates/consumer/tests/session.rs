//! Integration tests for consumption sessions over the in-memory broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checkpoint::{CheckpointStore, MemoryStore, PartitionCheckpoint};
use eventflow_consumer::{
    Error, MemoryBroker, MemoryPartition, Processor, Subscriber, SubscriberSettings, WorkerExit,
};
use eventflow_types::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
}

fn settings() -> SubscriberSettings {
    SubscriberSettings {
        receive_wait: Duration::from_millis(50),
        max_batch: 10,
        channel_capacity: 16,
    }
}

fn envelope(command: &str) -> Vec<u8> {
    Message::new("", "ok", command, command.as_bytes().to_vec())
        .serialize()
        .unwrap()
}

async fn recv_within(rx: &mut mpsc::Receiver<Message>, secs: u64) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("timed out waiting for a message")
}

/// Wait until the broker reports the expected checkpoint for a partition.
async fn wait_for_checkpoint(broker: &MemoryBroker, partition: usize, expected: i64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if broker.checkpoint(partition).await.unwrap() == Some(expected) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "partition {partition} never reached checkpoint {expected}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Checkpoint store that records every write, can fail one partition and can
/// stall reads of another.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<HashMap<String, Vec<i64>>>,
    failing_partition: Option<String>,
    slow_read: Option<(String, Duration)>,
}

#[async_trait]
impl CheckpointStore for RecordingStore {
    async fn store_checkpoint(&self, checkpoint: &PartitionCheckpoint) -> anyhow::Result<()> {
        if self.failing_partition.as_deref() == Some(checkpoint.partition_id.as_str()) {
            anyhow::bail!("checkpoint container unavailable");
        }
        self.writes
            .lock()
            .unwrap()
            .entry(checkpoint.partition_id.clone())
            .or_default()
            .push(checkpoint.sequence);
        self.inner.store_checkpoint(checkpoint).await
    }

    async fn read_checkpoint(
        &self,
        partition_id: &str,
    ) -> anyhow::Result<Option<PartitionCheckpoint>> {
        if let Some((slow, delay)) = &self.slow_read {
            if slow == partition_id {
                tokio::time::sleep(*delay).await;
            }
        }
        self.inner.read_checkpoint(partition_id).await
    }
}

/// Processor whose run loop fails after a short delay.
struct FailingRunLoop {
    inner: MemoryBroker,
}

#[async_trait]
impl Processor for FailingRunLoop {
    type Partition = MemoryPartition;

    async fn next_partition(&self) -> Option<MemoryPartition> {
        self.inner.next_partition().await
    }

    async fn run(&self, _cancel: CancellationToken) -> eventflow_consumer::Result<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(Error::Consumer("broker connection lost".to_string()))
    }

    async fn close(&self) -> eventflow_consumer::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_two_partitions_good_and_malformed() {
    init_tracing();

    let broker = MemoryBroker::new(2, Arc::new(MemoryStore::new()));
    for command in ["a-0", "a-1", "a-2"] {
        broker.publish(0, envelope(command)).unwrap();
    }
    broker.publish(1, b"{not an envelope".to_vec()).unwrap();

    let subscriber = Subscriber::new(broker.clone(), settings());
    let (mut rx, session) = subscriber.subscribe().unwrap();

    let mut normal = Vec::new();
    let mut errors = Vec::new();
    for _ in 0..4 {
        let message = recv_within(&mut rx, 5).await.unwrap();
        if message.is_error() {
            errors.push(message);
        } else {
            normal.push(message);
        }
    }

    assert_eq!(errors.len(), 1);
    let placeholder = &errors[0];
    assert!(placeholder.data().is_empty());
    assert!(placeholder.status().is_empty());
    assert!(placeholder.command().is_empty());
    assert!(!placeholder.operation_id().is_empty());

    let commands: Vec<_> = normal.iter().map(|m| m.command().to_string()).collect();
    assert_eq!(commands, vec!["a-0", "a-1", "a-2"]);
    assert!(normal.iter().all(|m| !m.operation_id().is_empty()));

    wait_for_checkpoint(&broker, 0, 2).await;
    wait_for_checkpoint(&broker, 1, 0).await;

    // Nothing else arrives while partition A blocks
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );

    let report = session.shutdown().await;
    assert!(report.is_clean(), "unexpected failures: {report:?}");
    assert_eq!(report.workers.len(), 2);
    assert_eq!(report.worker("1").unwrap().decode_failures, 1);
    assert_eq!(report.worker("0").unwrap().forwarded, 3);
    assert_eq!(broker.released_partitions(), 2);
}

#[tokio::test]
async fn test_cancel_closes_channel_and_stops_writes() {
    init_tracing();

    let broker = MemoryBroker::new(3, Arc::new(MemoryStore::new()));
    broker.publish(2, envelope("before")).unwrap();

    let subscriber = Subscriber::new(broker.clone(), settings());
    let (mut rx, session) = subscriber.subscribe().unwrap();
    assert_eq!(recv_within(&mut rx, 5).await.unwrap().command(), "before");

    session.cancel();
    assert!(session.is_cancelled());
    let report = session.wait().await;
    assert!(report.run_loop.is_ok());
    for worker in &report.workers {
        assert_eq!(worker.outcome.as_ref().unwrap(), &WorkerExit::Cancelled);
    }

    broker.publish(2, envelope("after")).unwrap();
    assert!(recv_within(&mut rx, 5).await.is_none());
    assert_eq!(broker.released_partitions(), 3);
}

#[tokio::test]
async fn test_checkpoints_never_go_backwards() {
    init_tracing();

    let store = Arc::new(RecordingStore::default());
    let broker = MemoryBroker::new(2, store.clone());
    let subscriber = Subscriber::new(
        broker.clone(),
        SubscriberSettings {
            max_batch: 3,
            ..settings()
        },
    );
    let (mut rx, session) = subscriber.subscribe().unwrap();

    let mut expected = 0;
    for burst in 0..4 {
        for i in 0..5 {
            broker.publish(0, envelope(&format!("p0-{burst}-{i}"))).unwrap();
            broker.publish(1, envelope(&format!("p1-{burst}-{i}"))).unwrap();
            expected += 2;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for _ in 0..expected {
        recv_within(&mut rx, 5).await.unwrap();
    }
    wait_for_checkpoint(&broker, 0, 19).await;
    wait_for_checkpoint(&broker, 1, 19).await;
    session.shutdown().await;

    let writes = store.writes.lock().unwrap();
    for (partition, sequences) in writes.iter() {
        assert!(
            sequences.windows(2).all(|w| w[0] <= w[1]),
            "partition {partition} checkpoints went backwards: {sequences:?}"
        );
        assert_eq!(sequences.last(), Some(&19));
    }
}

#[tokio::test]
async fn test_messages_keep_partition_order() {
    init_tracing();

    let broker = MemoryBroker::new(2, Arc::new(MemoryStore::new()));
    for i in 0..20 {
        broker.publish(0, envelope(&format!("a-{i:02}"))).unwrap();
        broker.publish(1, envelope(&format!("b-{i:02}"))).unwrap();
    }

    let subscriber = Subscriber::new(
        broker.clone(),
        SubscriberSettings {
            max_batch: 4,
            channel_capacity: 1,
            ..settings()
        },
    );
    let (mut rx, session) = subscriber.subscribe().unwrap();

    let mut a = Vec::new();
    let mut b = Vec::new();
    for _ in 0..40 {
        let message = recv_within(&mut rx, 5).await.unwrap();
        let command = message.command().to_string();
        if command.starts_with("a-") {
            a.push(command);
        } else {
            b.push(command);
        }
    }
    session.shutdown().await;

    let mut sorted_a = a.clone();
    sorted_a.sort();
    let mut sorted_b = b.clone();
    sorted_b.sort();
    assert_eq!(a, sorted_a);
    assert_eq!(b, sorted_b);
}

#[tokio::test]
async fn test_checkpoint_failure_only_stops_its_partition() {
    init_tracing();

    let store = Arc::new(RecordingStore {
        failing_partition: Some("1".to_string()),
        ..Default::default()
    });
    let broker = MemoryBroker::new(2, store);
    broker.publish(1, envelope("doomed")).unwrap();

    let subscriber = Subscriber::new(broker.clone(), settings());
    let (mut rx, session) = subscriber.subscribe().unwrap();

    // The item is delivered even though its checkpoint then fails
    assert_eq!(recv_within(&mut rx, 5).await.unwrap().command(), "doomed");

    // Partition 0 keeps flowing after partition 1's worker died
    tokio::time::sleep(Duration::from_millis(100)).await;
    broker.publish(0, envelope("still-alive")).unwrap();
    assert_eq!(recv_within(&mut rx, 5).await.unwrap().command(), "still-alive");

    let report = session.shutdown().await;
    assert!(!report.is_clean());
    assert!(matches!(
        report.worker("1").unwrap().outcome,
        Err(Error::CheckpointFailed { .. })
    ));
    assert!(report.worker("0").unwrap().outcome.is_ok());
    assert!(report.run_loop.is_ok());
    assert_eq!(broker.checkpoint(1).await.unwrap(), None);
    assert_eq!(broker.released_partitions(), 2);
}

#[tokio::test]
async fn test_worker_failure_during_assignment_loses_no_partition() {
    init_tracing();

    // Partition 0 fails on its first checkpoint and its task ends while
    // partition 1 is still reading its stored checkpoint
    let store = Arc::new(RecordingStore {
        failing_partition: Some("0".to_string()),
        slow_read: Some(("1".to_string(), Duration::from_millis(1500))),
        ..Default::default()
    });
    let broker = MemoryBroker::new(2, store);
    broker.publish(0, envelope("p0")).unwrap();
    broker.publish(1, envelope("p1")).unwrap();

    let subscriber = Subscriber::new(broker.clone(), settings());
    let (mut rx, session) = subscriber.subscribe().unwrap();

    let mut commands = vec![
        recv_within(&mut rx, 5).await.unwrap().command().to_string(),
        recv_within(&mut rx, 5).await.unwrap().command().to_string(),
    ];
    commands.sort();
    assert_eq!(commands, vec!["p0", "p1"]);
    wait_for_checkpoint(&broker, 1, 0).await;

    let report = session.shutdown().await;
    assert!(matches!(
        report.worker("0").unwrap().outcome,
        Err(Error::CheckpointFailed { .. })
    ));
    assert!(report.worker("1").unwrap().outcome.is_ok());
}

#[tokio::test]
async fn test_run_loop_failure_terminates_session() {
    init_tracing();

    let broker = MemoryBroker::new(2, Arc::new(MemoryStore::new()));
    let subscriber = Subscriber::new(
        FailingRunLoop {
            inner: broker.clone(),
        },
        settings(),
    );
    let (mut rx, session) = subscriber.subscribe().unwrap();

    // The stream just ends; nothing is returned from subscribe
    assert!(recv_within(&mut rx, 5).await.is_none());
    assert!(session.is_cancelled());

    let report = session.wait().await;
    assert!(matches!(report.run_loop, Err(Error::RunLoopFailed(_))));
    assert!(broker.is_closed());
    assert_eq!(broker.released_partitions(), 2);

    // Closing again after the failure path already closed is harmless
    subscriber.close().await.unwrap();
}

#[tokio::test]
async fn test_parent_cancellation_ends_session() {
    init_tracing();

    let broker = MemoryBroker::new(1, Arc::new(MemoryStore::new()));
    let subscriber = Subscriber::new(broker, settings());
    let parent = CancellationToken::new();
    let (mut rx, session) = subscriber.subscribe_with_parent(&parent).unwrap();

    parent.cancel();
    assert!(recv_within(&mut rx, 5).await.is_none());
    let report = session.wait().await;
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_resubscribe_resumes_after_checkpoint() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let broker = MemoryBroker::new(1, store.clone());
    broker.publish(0, envelope("first")).unwrap();
    broker.publish(0, envelope("second")).unwrap();

    let subscriber = Subscriber::new(broker.clone(), settings());
    let (mut rx, session) = subscriber.subscribe().unwrap();
    recv_within(&mut rx, 5).await.unwrap();
    recv_within(&mut rx, 5).await.unwrap();
    wait_for_checkpoint(&broker, 0, 1).await;
    session.shutdown().await;

    // Same log, same store, new broker instance
    let restarted = MemoryBroker::new(1, store);
    for command in ["first", "second", "third"] {
        restarted.publish(0, envelope(command)).unwrap();
    }
    let subscriber = Subscriber::new(restarted, settings());
    let (mut rx, session) = subscriber.subscribe().unwrap();
    assert_eq!(recv_within(&mut rx, 5).await.unwrap().command(), "third");
    session.shutdown().await;
}

#[tokio::test]
async fn test_invalid_settings_fail_synchronously() {
    let broker = MemoryBroker::new(1, Arc::new(MemoryStore::new()));
    let subscriber = Subscriber::new(
        broker,
        SubscriberSettings {
            channel_capacity: 0,
            ..settings()
        },
    );
    assert!(matches!(
        subscriber.subscribe(),
        Err(Error::InvalidConfig(_))
    ));
}
