//! Shared value types for eventflow.
//!
//! # Modules
//!
//! - [`message`] - The wire-level envelope exchanged between publishers and subscribers
//! - [`endpoint`] - Addressing values for the HTTP and broker transports
//! - [`error`] - Error types for envelope and endpoint operations
//!
//! # Example
//!
//! ```
//! use eventflow_types::Message;
//!
//! let msg = Message::new("op-1", "created", "order.create", b"{\"id\":1}".to_vec());
//! let bytes = msg.serialize().unwrap();
//! let decoded = Message::deserialize(&bytes).unwrap();
//! assert_eq!(decoded.command(), "order.create");
//! ```

pub mod endpoint;
pub mod error;
pub mod message;

pub use endpoint::{BrokerEndpoint, Endpoint, HttpEndpoint};
pub use error::{Error, Result};
pub use message::{new_operation_id, Message};
