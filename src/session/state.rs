//! Handshake-dialect session state machine
//!
//! Tracks one control connection from accept to close:
//!
//! ```text
//! AwaitingChallenge ─HMAC─► AwaitingConnect ─CONNECT─► AwaitingAttributes ─.─► Streaming
//!         │                        │                          │                  │
//!         └────────────────────────┴──────────────────────────┴──────────────────┴─► Closed
//! ```

use std::net::SocketAddr;
use std::time::Instant;

use crate::error::{AuthError, Error, ProtocolError};
use crate::protocol::{Challenge, ConnectionMetadata};
use crate::registry::ChannelId;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Connected, no nonce issued yet
    AwaitingChallenge,
    /// Nonce issued, waiting for CONNECT
    AwaitingConnect,
    /// Authenticated, collecting attributes
    AwaitingAttributes,
    /// Media port assigned
    Streaming,
    Closed,
}

/// Connection-local protocol state
#[derive(Debug)]
pub struct HandshakeSession {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    phase: HandshakePhase,

    /// Connection start time
    pub connected_at: Instant,

    challenge: Option<Challenge>,
    connect_attempted: bool,
    channel_id: Option<ChannelId>,
    metadata: ConnectionMetadata,
    media_port: Option<u16>,
}

impl HandshakeSession {
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: HandshakePhase::AwaitingChallenge,
            connected_at: Instant::now(),
            challenge: None,
            connect_attempted: false,
            channel_id: None,
            metadata: ConnectionMetadata::default(),
            media_port: None,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    pub fn media_port(&self) -> Option<u16> {
        self.media_port
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.phase,
            HandshakePhase::AwaitingAttributes | HandshakePhase::Streaming
        )
    }

    /// Fail if the session has been closed
    pub fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.phase == HandshakePhase::Closed {
            Err(ProtocolError::Closed)
        } else {
            Ok(())
        }
    }

    /// Issue the connection's nonce; later requests return the same one
    pub fn issue_challenge(&mut self) -> Result<&Challenge, ProtocolError> {
        self.ensure_open()?;
        if self.phase == HandshakePhase::AwaitingChallenge {
            self.phase = HandshakePhase::AwaitingConnect;
        }
        Ok(self.challenge.get_or_insert_with(Challenge::generate))
    }

    /// Record a CONNECT attempt and return the nonce to verify against
    ///
    /// Only one attempt is allowed per connection, successful or not.
    pub fn begin_connect(&mut self) -> Result<Challenge, Error> {
        self.ensure_open()?;
        if self.connect_attempted {
            return Err(ProtocolError::MultipleConnect.into());
        }
        self.connect_attempted = true;

        self.challenge
            .clone()
            .ok_or_else(|| AuthError::MissingChallenge.into())
    }

    /// Mark the CONNECT as verified
    pub fn complete_connect(&mut self, channel_id: ChannelId) {
        self.channel_id = Some(channel_id);
        self.phase = HandshakePhase::AwaitingAttributes;
    }

    /// Apply an attribute line; returns false if the key is unknown
    pub fn apply_attribute(&mut self, key: &str, value: &str) -> Result<bool, ProtocolError> {
        self.ensure_open()?;
        if !self.is_authenticated() {
            return Err(ProtocolError::ConnectBeforeAuth);
        }
        Ok(self.metadata.apply(key, value))
    }

    /// Check that the `.` command is allowed now
    pub fn check_can_stream(&self) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        match self.phase {
            HandshakePhase::AwaitingAttributes => Ok(()),
            HandshakePhase::Streaming => Err(ProtocolError::AlreadyStreaming),
            _ => Err(ProtocolError::ConnectBeforeAuth),
        }
    }

    /// Enter the streaming phase with the assigned media port
    pub fn begin_streaming(&mut self, media_port: u16) -> Result<(), ProtocolError> {
        self.check_can_stream()?;
        self.media_port = Some(media_port);
        self.phase = HandshakePhase::Streaming;
        Ok(())
    }

    pub fn close(&mut self) {
        self.phase = HandshakePhase::Closed;
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}
