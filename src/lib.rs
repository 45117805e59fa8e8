//! Live-media ingest relay
//!
//! Accepts publishers over two dialects and normalizes their media into a
//! pair of RTP tracks per channel:
//!
//! - the handshake dialect (FTL): a line-based control connection with HMAC
//!   challenge/response, followed by RTP datagrams on a dedicated UDP port
//!   that are forwarded as-is
//! - the message dialect (RTMP): FLV-tagged AAC and H.264, transcoded to Opus
//!   and repacketized to RTP
//!
//! Streams live in a [`StreamRegistry`], which coordinates an external
//! [`Service`](service::Service) and [`Orchestrator`](service::Orchestrator)
//! and supervises each stream with a heartbeat.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ingest_relay::registry::{RegistryConfig, StreamRegistry};
//! use ingest_relay::server::{IngestServer, ServerConfig};
//! use ingest_relay::service::{NoopOrchestrator, NoopService};
//!
//! # async fn run() -> ingest_relay::Result<()> {
//! let registry = Arc::new(StreamRegistry::new(
//!     RegistryConfig::default(),
//!     Arc::new(NoopService::new("secret")),
//!     Arc::new(NoopOrchestrator::new()),
//! ));
//!
//! let server = IngestServer::bind(ServerConfig::default(), registry).await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod stats;

pub use config::Config;
pub use error::{Error, Result};
pub use registry::{ChannelId, StreamId, StreamKey, StreamRegistry};
pub use server::{IngestServer, ServerConfig};
