//! Error types
//!
//! Every failure in the relay falls into one of the classes below. Protocol
//! and authentication errors are fatal to the connection that produced them,
//! transcode errors only drop the offending media unit, and registry/service
//! errors are returned to the caller.

use thiserror::Error;

pub use crate::registry::RegistryError;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("rtmp session error: {0}")]
    Session(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error only affects a single media unit
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Transcode(_) | Error::Media(_))
    }
}

/// Handshake-dialect protocol violations
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected arguments")]
    UnexpectedArguments,

    #[error("CONNECT may only be sent once per connection")]
    MultipleConnect,

    #[error("command received before authentication")]
    ConnectBeforeAuth,

    #[error("media port already assigned")]
    AlreadyStreaming,

    #[error("connection is closed")]
    Closed,

    #[error("session was not streaming within {0:?}")]
    SessionTimeout(std::time::Duration),

    #[error("failed to write media packet: {0}")]
    TrackWrite(String),
}

/// Authentication failures
///
/// The variants exist for server-side logging only; the remote peer never
/// learns which check failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no challenge was issued before CONNECT")]
    MissingChallenge,

    #[error("digest is not valid hex")]
    InvalidHex,

    #[error("digest does not match")]
    DigestMismatch,

    #[error("stream key does not match")]
    KeyMismatch,

    #[error("publish name is malformed")]
    InvalidPublishName,

    #[error("secret lookup failed: {0}")]
    SecretLookup(ServiceError),

    #[error("connection is no longer authenticated")]
    NotAuthenticated,
}

/// Malformed container or codec data
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("invalid AAC packet")]
    InvalidAacPacket,

    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("invalid audio tag")]
    InvalidAudioTag,

    #[error("invalid video tag")]
    InvalidVideoTag,

    #[error("unsupported audio format {0}")]
    UnsupportedAudioFormat(u8),

    #[error("unsupported video codec {0}")]
    UnsupportedVideoCodec(u8),
}

/// Per-unit transcode failures
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("AAC decoder could not be configured (code {0:#x})")]
    DecoderInit(u32),

    #[error("AAC decode failed (code {0:#x})")]
    Decode(u32),

    #[error("audio decoder has not received a sequence header")]
    DecoderNotConfigured,

    #[error("unsupported channel layout: {0} channels")]
    UnsupportedChannels(i32),

    #[error("opus encode failed: {0}")]
    Encode(#[from] opus::Error),

    #[error("resampler could not be created: {0}")]
    ResamplerInit(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),

    #[error("video frame received before sequence header")]
    MissingSequenceHeader,

    #[error("packetization failed: {0}")]
    Packetize(#[from] webrtc::rtp::Error),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Failure reported by the external service or orchestrator
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_errors_are_recoverable() {
        let err: Error = TranscodeError::DecoderNotConfigured.into();
        assert!(err.is_recoverable());

        let err: Error = ProtocolError::MultipleConnect.into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_auth_error_does_not_echo_secrets() {
        let err: Error = AuthError::DigestMismatch.into();
        assert_eq!(err.to_string(), "authentication failed: digest does not match");
    }
}
