//! Send side: POST an envelope to an HTTP endpoint.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use eventflow_types::{Endpoint, Message};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, StatusCode, Url};
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Default timeout for a single request, connect included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Publishes messages with one POST per call. There is no retry.
pub struct HttpSender {
    client: RwLock<Option<Client>>,
}

impl HttpSender {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = build_client(Client::builder().timeout(timeout))?;
        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    /// Serialize `message` and POST it to `endpoint`.
    ///
    /// A message without an operation id is sent with a fresh one; `message`
    /// itself is not modified. Only a 200 response counts as delivered.
    pub async fn send_request(&self, endpoint: &Endpoint, message: &Message) -> Result<()> {
        let started = Instant::now();
        let message = message.with_operation_id_or_new();
        debug!(
            operation_id = %message.operation_id(),
            command = %message.command(),
            status = %message.status(),
            "Sending message"
        );

        let payload = message.serialize().map_err(|e| {
            error!("Failed to serialize message: {e}");
            Error::SerializationFailed(e)
        })?;
        let url = request_url(endpoint)?;
        let client = self.client()?;

        let response = client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %url, "Failed to make HTTP request: {e}");
                Error::TransportFailed(e)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(
                endpoint = %url,
                status_code = status.as_u16(),
                response = %body,
                "Server returned non-OK status code"
            );
            return Err(Error::NonSuccessResponse {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            endpoint = %url,
            operation_id = %message.operation_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Message delivered"
        );
        Ok(())
    }

    /// Drop the connection pool. Later sends fail with [`Error::SenderClosed`].
    pub fn close(&self) {
        let mut client = self.client.write().unwrap_or_else(|p| p.into_inner());
        if client.take().is_some() {
            debug!("HTTP sender closed");
        }
    }

    fn client(&self) -> Result<Client> {
        self.client
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(Error::SenderClosed)
    }
}

fn build_client(builder: ClientBuilder) -> Result<Client> {
    builder
        .build()
        .map_err(|e| Error::InvalidConfig(format!("Failed to build HTTP client: {e}")))
}

/// Resolve the request URL without touching the network.
fn request_url(endpoint: &Endpoint) -> Result<Url> {
    let Some(http) = endpoint.as_http() else {
        return Err(Error::RequestConstructionFailed {
            endpoint: endpoint.endpoint(),
            reason: format!("{} endpoints do not accept HTTP requests", endpoint.kind()),
        });
    };

    let address = http.endpoint();
    let url = Url::parse(&address).map_err(|e| Error::RequestConstructionFailed {
        endpoint: address.clone(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::RequestConstructionFailed {
            endpoint: address,
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}
