//! Command-line interface for eventflow
//!
//! # Usage Examples
//!
//! ## Subscribe
//! ```bash
//! # Print every message on a Kafka topic as a JSON line
//! eventflow subscribe --brokers localhost:9092 --topic orders --group-id order-printer
//!
//! # Stop after five minutes
//! eventflow subscribe --brokers localhost:9092 --topic orders --timeout 5m
//! ```
//!
//! ## Publish
//! ```bash
//! # POST a message to an HTTP endpoint
//! eventflow publish --url http://localhost:8080/events \
//!   --command order.create --status created --data '{"id":1}'
//!
//! # Send the same message to a Kafka topic
//! eventflow publish --brokers localhost:9092 --topic orders \
//!   --command order.create --data '{"id":1}'
//! ```
//!
//! ## Serve
//! ```bash
//! # Print messages POSTed to http://0.0.0.0:8080/events
//! eventflow serve --port 8080 --path /events
//! ```

use std::future;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use clap::{Parser, Subcommand};
use eventflow_consumer::{
    parse_duration, KafkaConfig, KafkaProcessor, KafkaPublisher, SessionReport, Subscriber,
};
use eventflow_http::{HttpReceiver, HttpSender};
use eventflow_types::{Endpoint, HttpEndpoint, Message};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "eventflow")]
#[command(about = "Consume and publish message envelopes over Kafka and HTTP")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume every partition of a Kafka topic and print messages as JSON lines
    Subscribe {
        #[command(flatten)]
        kafka: KafkaConfig,

        /// Stop after this long (e.g. "30s", "5m"); runs until Ctrl-C when omitted
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Publish a single message to an HTTP endpoint or a Kafka topic
    Publish {
        #[command(flatten)]
        target: PublishTarget,

        #[command(flatten)]
        message: MessageArgs,

        /// Request timeout for HTTP targets
        #[arg(long, default_value = "30s")]
        timeout: String,
    },

    /// Run an HTTP receiver and print messages posted to it
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080", env = "EVENTFLOW_PORT")]
        port: String,

        /// Path accepting POSTed messages
        #[arg(long, default_value = "/events")]
        path: String,
    },
}

#[derive(clap::Args)]
#[group(required = true, multiple = true)]
struct PublishTarget {
    /// HTTP endpoint URL (e.g. http://localhost:8080/events)
    #[arg(long, conflicts_with_all = ["brokers", "topic"])]
    url: Option<String>,

    /// Kafka brokers (comma-separated)
    #[arg(long, value_delimiter = ',', requires = "topic")]
    brokers: Vec<String>,

    /// Kafka topic
    #[arg(long, requires = "brokers")]
    topic: Option<String>,
}

impl PublishTarget {
    fn endpoint(&self) -> anyhow::Result<Endpoint> {
        match (&self.url, &self.topic) {
            (Some(url), _) => {
                let endpoint = HttpEndpoint::parse(url)
                    .with_context(|| format!("Invalid endpoint URL: {url}"))?;
                Ok(endpoint.into())
            }
            (None, Some(topic)) => Ok(KafkaConfig::new(
                self.brokers.clone(),
                "eventflow-publisher",
                topic.clone(),
            )
            .endpoint()
            .into()),
            (None, None) => anyhow::bail!("Either --url or --brokers and --topic is required"),
        }
    }
}

#[derive(clap::Args)]
struct MessageArgs {
    /// Command name carried by the message
    #[arg(long)]
    command: String,

    /// Status carried by the message
    #[arg(long, default_value = "")]
    status: String,

    /// Payload, sent as the raw bytes of this string
    #[arg(long, default_value = "")]
    data: String,

    /// Treat --data as base64 and send the decoded bytes
    #[arg(long)]
    base64: bool,

    /// Correlation id; a fresh one is generated when omitted
    #[arg(long)]
    operation_id: Option<String>,
}

impl MessageArgs {
    fn to_message(&self) -> anyhow::Result<Message> {
        let data = if self.base64 {
            base64::engine::general_purpose::STANDARD
                .decode(&self.data)
                .context("Invalid base64 in --data")?
        } else {
            self.data.as_bytes().to_vec()
        };
        Ok(Message::new(
            self.operation_id.clone().unwrap_or_default(),
            self.status.clone(),
            self.command.clone(),
            data,
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Subscribe { kafka, timeout } => {
            let timeout = timeout
                .as_deref()
                .map(parse_duration)
                .transpose()
                .context("Invalid --timeout")?;
            run_subscribe(kafka, timeout).await
        }
        Commands::Publish {
            target,
            message,
            timeout,
        } => {
            let timeout = parse_duration(&timeout).context("Invalid --timeout")?;
            run_publish(&target, message.to_message()?, timeout).await
        }
        Commands::Serve { port, path } => run_serve(port, path).await,
    }
}

async fn run_subscribe(kafka: KafkaConfig, timeout: Option<Duration>) -> anyhow::Result<()> {
    let settings = kafka.subscriber_settings()?;
    let processor = KafkaProcessor::new(&kafka).context("Failed to create Kafka consumer")?;
    let subscriber = Subscriber::new(processor, settings);
    let (mut messages, session) = subscriber.subscribe()?;
    info!(endpoint = %kafka.endpoint().endpoint(), "Subscribed");

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = wait_until(deadline) => {
                info!("Timeout reached, shutting down");
                break;
            }
            next = messages.recv() => match next {
                Some(message) => {
                    println!("{}", serde_json::to_string(&message)?);
                    received += 1;
                }
                None => {
                    warn!("Message stream closed");
                    break;
                }
            }
        }
    }

    let report = session.shutdown().await;
    subscriber.close().await?;
    info!(received, "Subscription finished");
    summarize(report)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn summarize(report: SessionReport) -> anyhow::Result<()> {
    for worker in &report.workers {
        match &worker.outcome {
            Ok(exit) => info!(
                partition = %worker.partition_id,
                forwarded = worker.forwarded,
                decode_failures = worker.decode_failures,
                last_checkpoint = ?worker.last_checkpoint,
                "Partition finished: {exit:?}"
            ),
            Err(e) => warn!(
                partition = %worker.partition_id,
                forwarded = worker.forwarded,
                "Partition failed: {e}"
            ),
        }
    }
    report.run_loop.context("Kafka consumer failed")
}

async fn run_publish(
    target: &PublishTarget,
    message: Message,
    timeout: Duration,
) -> anyhow::Result<()> {
    let endpoint = target.endpoint()?;
    match &endpoint {
        Endpoint::Http(_) => {
            let sender = HttpSender::with_timeout(timeout)?;
            let result = sender.send_request(&endpoint, &message).await;
            sender.close();
            result.with_context(|| format!("Failed to publish to {endpoint}"))?;
        }
        Endpoint::Broker(broker) => {
            let config = KafkaConfig::new(
                broker.brokers().to_vec(),
                broker.consumer_group(),
                broker.topic(),
            );
            let publisher = KafkaPublisher::new(&config)?;
            publisher
                .publish(&message)
                .await
                .with_context(|| format!("Failed to publish to {endpoint}"))?;
        }
    }
    info!(%endpoint, command = %message.command(), "Message published");
    Ok(())
}

async fn run_serve(port: String, path: String) -> anyhow::Result<()> {
    let mut receiver = HttpReceiver::new(port);
    let mut messages = receiver.subscribe(&path)?;
    if path != "/health" {
        receiver.register_endpoint("/health", || async { "ok" })?;
    }
    let addr = receiver.start().await.context("Failed to start HTTP receiver")?;
    info!(%addr, %path, "Receiving messages");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            next = messages.recv() => match next {
                Some(message) => println!("{}", serde_json::to_string(&message)?),
                None => break,
            }
        }
    }

    receiver.stop().await?;
    Ok(())
}
