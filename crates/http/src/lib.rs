//! HTTP transport for eventflow messages.
//!
//! - [`HttpSender`] POSTs a serialized [`Message`](eventflow_types::Message) to an
//!   [`Endpoint`](eventflow_types::Endpoint) and classifies the response.
//! - [`HttpReceiver`] runs an axum server with its own routes and turns POSTed
//!   envelopes back into messages on a channel.

pub mod error;
pub mod receiver;
pub mod sender;

pub use error::{Error, Result};
pub use receiver::{is_success, HttpReceiver};
pub use sender::HttpSender;
