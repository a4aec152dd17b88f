//! Receive side: an HTTP server whose routes belong to one receiver instance.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::Request;
use axum::handler::Handler;
use axum::http::header::HOST;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, post, MethodRouter};
use axum::Router;
use eventflow_types::{new_operation_id, Message};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Capacity of each channel returned by [`HttpReceiver::subscribe`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Statuses treated as a successfully handled request.
pub fn is_success(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
    )
}

/// HTTP server adapter.
///
/// Routes are registered on the receiver's own router before [`start`]; two
/// receivers never share routes.
///
/// [`start`]: HttpReceiver::start
pub struct HttpReceiver {
    port: String,
    router: Router,
    paths: HashSet<String>,
    channel_capacity: usize,
    shutdown: CancellationToken,
    server: Option<JoinHandle<std::io::Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl HttpReceiver {
    /// Create a receiver that will listen on `port` (`"0"` picks a free port).
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            router: Router::new(),
            paths: HashSet::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown: CancellationToken::new(),
            server: None,
            local_addr: None,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Register `handler` for every method on `path`.
    ///
    /// Requests are logged with their status, and classified as success or
    /// failure by [`is_success`].
    pub fn register_endpoint<H, T>(&mut self, path: &str, handler: H) -> Result<()>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.route(path, any(handler))
    }

    /// Accept envelopes POSTed to `path` and forward them on the returned channel.
    ///
    /// The request gets a 500 if its body cannot be read or decoded, and a 200
    /// once the message is queued. Requests wait while the channel is full.
    pub fn subscribe(&mut self, path: &str) -> Result<mpsc::Receiver<Message>> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let handler = move |body: std::result::Result<Bytes, BytesRejection>| {
            forward(tx.clone(), body)
        };
        self.route(path, post(handler))?;
        Ok(rx)
    }

    fn route(&mut self, path: &str, method_router: MethodRouter) -> Result<()> {
        if self.server.is_some() {
            return Err(Error::Receiver(format!(
                "cannot register '{path}' after the receiver has started"
            )));
        }
        if !path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "endpoint path '{path}' must start with '/'"
            )));
        }
        if !self.paths.insert(path.to_string()) {
            return Err(Error::InvalidConfig(format!(
                "endpoint path '{path}' is already registered"
            )));
        }

        debug!(path, "Registering endpoint");
        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, method_router.layer(middleware::from_fn(log_request)));
        Ok(())
    }

    /// Bind the port and serve in the background. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.server.is_some() {
            return Err(Error::Receiver("receiver is already running".to_string()));
        }
        if self.port.is_empty() {
            return Err(Error::InvalidConfig("port number is empty".to_string()));
        }
        let port: u16 = self
            .port
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("invalid port '{}': {e}", self.port)))?;

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;

        let app = self.router.clone();
        let shutdown = self.shutdown.clone();
        self.server = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }));
        self.local_addr = Some(addr);

        info!(%addr, "HTTP receiver listening");
        Ok(addr)
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(server) = self.server.take() else {
            return Ok(());
        };
        self.shutdown.cancel();
        self.shutdown = CancellationToken::new();
        self.local_addr = None;

        let result = match server.await {
            Ok(result) => result.map_err(Error::Io),
            Err(e) => Err(Error::Receiver(format!("server task failed: {e}"))),
        };
        match &result {
            Ok(()) => info!("HTTP receiver stopped"),
            Err(e) => error!("Failed to shut down HTTP receiver: {e}"),
        }
        result
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }
}

async fn forward(
    tx: mpsc::Sender<Message>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> (StatusCode, &'static str) {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to read request body: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read request body",
            );
        }
    };

    let mut message = match Message::deserialize(&body) {
        Ok(message) => message,
        Err(e) => {
            error!("Failed to decode message: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to decode message");
        }
    };
    if message.operation_id().is_empty() {
        message.set_operation_id(new_operation_id());
    }
    debug!(operation_id = %message.operation_id(), command = %message.command(), "Message received");

    if tx.send(message).await.is_err() {
        warn!("Subscriber channel closed, rejecting message");
        return (StatusCode::SERVICE_UNAVAILABLE, "Subscriber is gone");
    }
    (StatusCode::OK, "")
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let host = request
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if is_success(status) {
        info!(%method, %path, %host, status = status.as_u16(), elapsed_ms, "Request processed successfully");
    } else {
        warn!(%method, %path, %host, status = status.as_u16(), elapsed_ms, "Request failed");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;
    use tower::ServiceExt;

    fn post_request(path: &str, body: impl Into<Body>) -> Request {
        http::Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[test]
    fn test_is_success() {
        for status in [200, 201, 202, 204] {
            assert!(is_success(StatusCode::from_u16(status).unwrap()));
        }
        for status in [203, 301, 400, 404, 500] {
            assert!(!is_success(StatusCode::from_u16(status).unwrap()));
        }
    }

    #[tokio::test]
    async fn test_subscribe_forwards_decoded_message() {
        let mut receiver = HttpReceiver::new("0");
        let mut rx = receiver.subscribe("/events").unwrap();

        let body = Message::new("", "ok", "order.create", b"{}".to_vec())
            .serialize()
            .unwrap();
        let response = receiver
            .router
            .clone()
            .oneshot(post_request("/events", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.command(), "order.create");
        assert!(!message.operation_id().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_garbage() {
        let mut receiver = HttpReceiver::new("0");
        let mut rx = receiver.subscribe("/events").unwrap();

        let response = receiver
            .router
            .clone()
            .oneshot(post_request("/events", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_receivers_do_not_share_routes() {
        let mut first = HttpReceiver::new("0");
        let second = HttpReceiver::new("0");
        first
            .register_endpoint("/health", || async { StatusCode::NO_CONTENT })
            .unwrap();

        let request = || http::Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = first.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = second.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_register_rejects_bad_paths() {
        let mut receiver = HttpReceiver::new("0");
        receiver
            .register_endpoint("/orders", || async { StatusCode::OK })
            .unwrap();

        assert!(matches!(
            receiver.register_endpoint("/orders", || async { StatusCode::OK }),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            receiver.subscribe("orders"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_start_validates_port() {
        let mut receiver = HttpReceiver::new("");
        assert!(matches!(receiver.start().await, Err(Error::InvalidConfig(_))));

        let mut receiver = HttpReceiver::new("http");
        assert!(matches!(receiver.start().await, Err(Error::InvalidConfig(_))));
        assert!(!receiver.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut receiver = HttpReceiver::new("0");
        receiver.stop().await.unwrap();
    }
}
