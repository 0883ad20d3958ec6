//! Upstream status stream: provider interface, wire decoding and the
//! Twitter filter endpoint.

pub mod decoder;
pub mod provider;
pub mod twitter;

pub use decoder::StatusDecoder;
pub use provider::{MessageStream, StreamConnection, StreamProvider};
pub use twitter::{Credentials, DEFAULT_ENDPOINT, TwitterStreamProvider};
