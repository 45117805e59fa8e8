//! Ingest server
//!
//! Two TCP listeners, one per dialect, each spawning a task per connection:
//!
//! ```text
//! IngestServer ─┬─ handshake listener ─► HandshakeConnection ─► MediaLoop (UDP)
//!               └─ message listener ───► MessageConnection ───► ConnectionSampler
//! ```
//!
//! Connections claim their channel through the shared [`StreamRegistry`] and
//! close when their stream is stopped from elsewhere.
//!
//! [`StreamRegistry`]: crate::registry::StreamRegistry

pub mod config;
pub mod ftl;
pub mod listener;
pub mod rtmp;
pub mod sampler;

use std::sync::Arc;

use crate::registry::Stream;

pub use config::ServerConfig;
pub use ftl::HandshakeConnection;
pub use listener::IngestServer;
pub use rtmp::{parse_publish_name, MessageConnection};
pub use sampler::ConnectionSampler;

/// Resolves when `stream` is stopped; never resolves without one
pub(crate) async fn wait_stopped(stream: Option<Arc<Stream>>) {
    match stream {
        Some(stream) => stream.stopped().await,
        None => std::future::pending().await,
    }
}
