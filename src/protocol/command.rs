//! Handshake-dialect command grammar
//!
//! Each control line is one command:
//!
//! ```text
//! HMAC                        request a challenge nonce
//! CONNECT <channel> $<hex>    authenticate (also "<channel> <hex>", "<channel>-<hex>")
//! <Key>: <Value>              stream attribute
//! .                           attributes done, start media
//! PING                        keepalive
//! DISCONNECT                  close
//! ```

use crate::error::ProtocolError;
use crate::registry::ChannelId;

/// One parsed control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hmac,
    Connect { channel_id: ChannelId, digest: String },
    Attribute { key: String, value: String },
    Dot,
    Ping,
    Disconnect,
    Unknown(String),
}

impl Command {
    /// Parse a line with its terminator already stripped
    pub fn parse(line: &str) -> Result<Command, ProtocolError> {
        let line = line.trim_end_matches('\r');

        match line {
            "HMAC" => return Ok(Command::Hmac),
            "." => return Ok(Command::Dot),
            "PING" => return Ok(Command::Ping),
            "DISCONNECT" => return Ok(Command::Disconnect),
            _ => {}
        }

        if let Some(args) = line.strip_prefix("CONNECT ") {
            return parse_connect(args);
        }

        if let Some((key, value)) = line.split_once(": ") {
            if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Ok(Command::Attribute {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                });
            }
        }

        Ok(Command::Unknown(line.to_string()))
    }

    /// Short name for logging; never includes arguments
    pub fn name(&self) -> &'static str {
        match self {
            Command::Hmac => "HMAC",
            Command::Connect { .. } => "CONNECT",
            Command::Attribute { .. } => "attribute",
            Command::Dot => ".",
            Command::Ping => "PING",
            Command::Disconnect => "DISCONNECT",
            Command::Unknown(_) => "unknown",
        }
    }
}

fn parse_connect(args: &str) -> Result<Command, ProtocolError> {
    let args = args.trim();
    let (channel, digest) = match args.split_once(' ') {
        Some((channel, digest)) => (channel, digest.trim()),
        None => args.split_once('-').ok_or(ProtocolError::UnexpectedArguments)?,
    };
    let digest = digest.strip_prefix('$').unwrap_or(digest);

    let channel_id: ChannelId = channel
        .parse()
        .map_err(|_| ProtocolError::UnexpectedArguments)?;

    if digest.is_empty() || digest.contains(char::is_whitespace) {
        return Err(ProtocolError::UnexpectedArguments);
    }

    Ok(Command::Connect {
        channel_id,
        digest: digest.to_string(),
    })
}
