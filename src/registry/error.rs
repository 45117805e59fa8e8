//! Registry error types
//!
//! Error types for stream registry operations.

use super::ids::ChannelId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A stream is already registered for the channel
    StreamAlreadyExists(ChannelId),
    /// No stream is registered for the channel
    StreamNotFound(ChannelId),
    /// Another caller is already stopping the stream
    StreamStopping(ChannelId),
    /// The stream has not been assigned an identifier by the service yet
    StreamNotStarted(ChannelId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::StreamAlreadyExists(channel) => {
                write!(f, "Stream already exists for channel {}", channel)
            }
            RegistryError::StreamNotFound(channel) => {
                write!(f, "Stream not found for channel {}", channel)
            }
            RegistryError::StreamStopping(channel) => {
                write!(f, "Stream for channel {} is already stopping", channel)
            }
            RegistryError::StreamNotStarted(channel) => {
                write!(f, "Stream for channel {} has not started", channel)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
