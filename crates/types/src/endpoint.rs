//! Endpoint values.
//!
//! Every transport eventflow talks to is one variant of [`Endpoint`]. Adapters
//! match on the variant once, when the request is built, instead of probing a
//! generic endpoint at runtime.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// Addressing information for one of the supported transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// HTTP send/receive adapter
    Http(HttpEndpoint),
    /// Partitioned log broker (Kafka)
    Broker(BrokerEndpoint),
}

impl Endpoint {
    /// Resolve to a single address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Http(http) => http.endpoint(),
            Self::Broker(broker) => broker.endpoint(),
        }
    }

    /// Short name of the transport, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Broker(_) => "broker",
        }
    }

    pub fn as_http(&self) -> Option<&HttpEndpoint> {
        match self {
            Self::Http(http) => Some(http),
            Self::Broker(_) => None,
        }
    }

    pub fn as_broker(&self) -> Option<&BrokerEndpoint> {
        match self {
            Self::Broker(broker) => Some(broker),
            Self::Http(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

impl From<HttpEndpoint> for Endpoint {
    fn from(http: HttpEndpoint) -> Self {
        Self::Http(http)
    }
}

impl From<BrokerEndpoint> for Endpoint {
    fn from(broker: BrokerEndpoint) -> Self {
        Self::Broker(broker)
    }
}

/// HTTP endpoint split into its parts.
///
/// Setters replace one part at a time. The value is not synchronized, so an
/// endpoint shared with an in-flight request should be cloned before editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    scheme: String,
    host: String,
    port: String,
    path: String,
}

impl HttpEndpoint {
    /// Create an `http` endpoint from host, port and path.
    pub fn new(host: impl Into<String>, port: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.into(),
            port: port.into(),
            path: path.into(),
        }
    }

    /// Parse a full URL such as `http://localhost:8080/orders`.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let mut parsed = Self::new("", "", "");
        parsed.set_endpoint(endpoint)?;
        Ok(parsed)
    }

    /// The address string: `scheme://host[:port]path`.
    pub fn endpoint(&self) -> String {
        let mut url = format!("{}://{}", self.scheme, self.host);
        if !self.port.is_empty() {
            url.push(':');
            url.push_str(&self.port);
        }
        if !self.path.is_empty() && !self.path.starts_with('/') {
            url.push('/');
        }
        url.push_str(&self.path);
        url
    }

    /// Replace every part by re-parsing `endpoint`.
    ///
    /// On error the current value is left untouched.
    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<()> {
        let url = Url::parse(endpoint).map_err(|e| Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let host = url.host_str().ok_or_else(|| Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "missing host".to_string(),
        })?;

        self.scheme = url.scheme().to_string();
        self.host = host.to_string();
        self.port = url.port().map(|p| p.to_string()).unwrap_or_default();
        self.path = url.path().to_string();
        Ok(())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = scheme.into();
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn set_port(&mut self, port: impl Into<String>) {
        self.port = port.into();
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }
}

/// Broker endpoint: bootstrap servers, topic and consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    brokers: Vec<String>,
    topic: String,
    consumer_group: String,
}

impl BrokerEndpoint {
    pub fn new(
        brokers: Vec<String>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            consumer_group: consumer_group.into(),
        }
    }

    /// The address string: `kafka://broker1,broker2/topic`.
    pub fn endpoint(&self) -> String {
        format!("kafka://{}/{}", self.brokers.join(","), self.topic)
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Comma separated bootstrap list, as the Kafka client expects it.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn set_brokers(&mut self, brokers: Vec<String>) {
        self.brokers = brokers;
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = topic.into();
    }

    pub fn set_consumer_group(&mut self, consumer_group: impl Into<String>) {
        self.consumer_group = consumer_group.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_endpoint_string() {
        let endpoint = HttpEndpoint::new("localhost", "8080", "/orders");
        assert_eq!(endpoint.endpoint(), "http://localhost:8080/orders");

        let no_port = HttpEndpoint::new("example.com", "", "events");
        assert_eq!(no_port.endpoint(), "http://example.com/events");
    }

    #[test]
    fn test_http_endpoint_setters() {
        let mut endpoint = HttpEndpoint::new("localhost", "8080", "/a");
        endpoint.set_host("10.0.0.1");
        endpoint.set_port("9090");
        endpoint.set_path("/b");
        assert_eq!(endpoint.endpoint(), "http://10.0.0.1:9090/b");
    }

    #[test]
    fn test_set_endpoint_reparses() {
        let mut endpoint = HttpEndpoint::new("localhost", "8080", "/a");
        endpoint.set_endpoint("https://api.example.com:8443/v1/events").unwrap();

        assert_eq!(endpoint.scheme(), "https");
        assert_eq!(endpoint.host(), "api.example.com");
        assert_eq!(endpoint.port(), "8443");
        assert_eq!(endpoint.path(), "/v1/events");
    }

    #[test]
    fn test_set_endpoint_rejects_garbage_and_keeps_value() {
        let mut endpoint = HttpEndpoint::new("localhost", "8080", "/a");
        let err = endpoint.set_endpoint("not a url").unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint { .. }));
        assert_eq!(endpoint.endpoint(), "http://localhost:8080/a");
    }

    #[test]
    fn test_broker_endpoint() {
        let endpoint = Endpoint::from(BrokerEndpoint::new(
            vec!["k1:9092".to_string(), "k2:9092".to_string()],
            "orders",
            "billing",
        ));
        assert_eq!(endpoint.endpoint(), "kafka://k1:9092,k2:9092/orders");
        assert_eq!(endpoint.kind(), "broker");
        assert!(endpoint.as_http().is_none());
        assert_eq!(
            endpoint.as_broker().unwrap().bootstrap_servers(),
            "k1:9092,k2:9092"
        );
    }
}
