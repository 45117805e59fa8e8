//! Connection-local state
//!
//! Nothing here is shared with the registry: the handshake phase machine
//! belongs to one control connection, and the accounting arena is shared only
//! between a connection's media path and its sampler.

pub mod accounting;
pub mod state;

pub use accounting::{MediaAccounting, WindowSnapshot};
pub use state::{HandshakePhase, HandshakeSession};
