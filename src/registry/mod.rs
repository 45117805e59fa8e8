//! Stream registry and supervisors
//!
//! The registry owns every live stream, keyed by channel. Ingest connections
//! start and stop streams through it; egress consumers look up a stream's
//! tracks through it.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<       │
//!                     │   ChannelId,            │
//!                     │   Arc<Stream> {         │
//!                     │     tracks,             │
//!                     │     counters,           │
//!                     │     keyframe slot,      │
//!                     │     cancel token,       │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Connection]            [Heartbeat]           [Preview sampler]
//!    write_rtp()             every 15s:            every 5s:
//!    set_keyframe()          preview, metadata,    keyframe slot
//!                            orchestrator beacon   → preview queue
//! ```
//!
//! Every background task watches the stream's cancellation token, so stopping
//! a stream through any path winds down its supervisors and the connection
//! that feeds it.

pub mod config;
pub mod entry;
pub mod error;
pub mod heartbeat;
pub mod ids;
mod preview;
pub mod store;
pub mod track;

pub use config::RegistryConfig;
pub use entry::{ClientInfo, Stream, StreamState};
pub use error::RegistryError;
pub use heartbeat::FailureCounter;
pub use ids::{ChannelId, StreamId, StreamKey};
pub use store::StreamRegistry;
pub use track::{RtpTrack, TrackKind, TrackPair};
