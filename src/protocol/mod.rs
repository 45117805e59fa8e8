//! Handshake-dialect (FTL) control protocol
//!
//! Line-based commands over TCP, authenticated with an HMAC-SHA512
//! challenge/response. See [`command`] for the grammar.

pub mod attributes;
pub mod auth;
pub mod command;

pub use attributes::{ConnectionMetadata, PayloadRouting, Route};
pub use auth::{Challenge, CHALLENGE_SIZE};
pub use command::Command;

/// Successful reply
pub const RESPONSE_OK: &str = "200";

/// Reply to `PING`
pub const RESPONSE_PONG: &str = "PONG";

/// Line terminator for replies
pub const LINE_ENDING: &str = "\r\n";
