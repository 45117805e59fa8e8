//! Handshake-dialect (FTL) connection handler
//!
//! Drives one control connection through the [`HandshakeSession`] phases.
//! Once the publisher sends `.`, a UDP socket is bound for its media and a
//! separate task forwards the RTP packets it receives onto the stream's
//! tracks, routed by the payload types announced in the attributes.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::Unmarshal;

use crate::error::{Error, ProtocolError, Result};
use crate::media::KeyframeCollector;
use crate::protocol::{Command, PayloadRouting, Route, LINE_ENDING, RESPONSE_OK, RESPONSE_PONG};
use crate::registry::{ChannelId, Stream, StreamRegistry};
use crate::server::config::ServerConfig;
use crate::server::wait_stopped;
use crate::session::HandshakeSession;

/// A handshake-dialect control connection
pub struct HandshakeConnection {
    session: HandshakeSession,
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    /// Cancelled on close, on media failure, and on server shutdown
    cancel: CancellationToken,
    stream: Option<Arc<Stream>>,
    routing: Option<watch::Sender<PayloadRouting>>,
    media_task: Option<JoinHandle<()>>,
}

impl HandshakeConnection {
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        registry: Arc<StreamRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();

        Self {
            session: HandshakeSession::new(session_id, peer_addr),
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
            config,
            registry,
            cancel,
            stream: None,
            routing: None,
            media_task: None,
        }
    }

    /// Serve the connection until it closes, then tear down its stream
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;
        self.close().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let session_timeout = self.config.session_timeout;
        let deadline = tokio::time::sleep(session_timeout);
        tokio::pin!(deadline);
        let mut deadline_armed = true;

        loop {
            let stream = self.stream.clone();
            if self.media_started() {
                deadline_armed = false;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),

                _ = wait_stopped(stream) => {
                    tracing::info!(
                        session_id = self.session.id,
                        "Stream stopped, closing connection"
                    );
                    return Ok(());
                }

                _ = &mut deadline, if deadline_armed => {
                    if self.media_started() {
                        deadline_armed = false;
                        continue;
                    }
                    return Err(ProtocolError::SessionTimeout(session_timeout).into());
                }

                line = self.reader.next_line() => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        continue;
                    }
                    if !self.handle_line(&line).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn media_started(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.media_started())
    }

    /// Handle one control line; returns false when the peer asked to close
    async fn handle_line(&mut self, line: &str) -> Result<bool> {
        let command = Command::parse(line)?;
        tracing::trace!(
            session_id = self.session.id,
            command = command.name(),
            "Received command"
        );

        match command {
            Command::Hmac => {
                let nonce = self.session.issue_challenge()?.hex();
                self.send(&format!("{} {}", RESPONSE_OK, nonce)).await?;
            }
            Command::Connect { channel_id, digest } => {
                self.handle_connect(channel_id, &digest).await?;
            }
            Command::Attribute { key, value } => {
                self.handle_attribute(&key, &value)?;
            }
            Command::Dot => self.handle_dot().await?,
            Command::Ping => {
                self.session.ensure_open()?;
                self.send(RESPONSE_PONG).await?;
            }
            Command::Disconnect => {
                tracing::info!(session_id = self.session.id, "Publisher disconnected");
                return Ok(false);
            }
            Command::Unknown(line) => {
                tracing::debug!(
                    session_id = self.session.id,
                    command = %line,
                    "Unknown ingest command"
                );
            }
        }

        Ok(true)
    }

    async fn handle_connect(&mut self, channel_id: ChannelId, digest: &str) -> Result<()> {
        let challenge = self.session.begin_connect()?;
        let secret = self.registry.fetch_secret(channel_id).await?;
        challenge.verify(&secret, digest)?;

        self.session.complete_connect(channel_id);
        tracing::info!(
            session_id = self.session.id,
            channel_id = %channel_id,
            peer = %self.session.peer_addr,
            "Publisher authenticated"
        );

        self.send(RESPONSE_OK).await
    }

    fn handle_attribute(&mut self, key: &str, value: &str) -> Result<()> {
        if !self.session.apply_attribute(key, value)? {
            tracing::debug!(
                session_id = self.session.id,
                key = key,
                "Unexpected attribute"
            );
            return Ok(());
        }

        // Late attributes still reach a running media loop
        if let Some(routing) = &self.routing {
            routing.send_replace(self.session.metadata().routing());
        }
        if let Some(stream) = &self.stream {
            let metadata = self.session.metadata();
            stream.update_client_info(|info| metadata.apply_to(info));
        }
        Ok(())
    }

    async fn handle_dot(&mut self) -> Result<()> {
        self.session.check_can_stream()?;
        let channel_id = self
            .session
            .channel_id()
            .ok_or(ProtocolError::ConnectBeforeAuth)?;

        let socket = UdpSocket::bind(SocketAddr::new(self.config.media_bind_ip, 0)).await?;
        let port = socket.local_addr()?.port();

        let stream = self.registry.start_stream(channel_id).await?;
        let metadata = self.session.metadata();
        stream.update_client_info(|info| metadata.apply_to(info));

        let (routing_tx, routing_rx) = watch::channel(metadata.routing());
        let media = MediaLoop {
            session_id: self.session.id,
            socket,
            stream: Arc::clone(&stream),
            routing: routing_rx,
            keyframes: KeyframeCollector::new(),
            buffer_size: self.config.media_read_buffer,
            cancel: self.cancel.clone(),
        };
        self.media_task = Some(tokio::spawn(media.run()));
        self.routing = Some(routing_tx);
        self.stream = Some(stream);
        self.session.begin_streaming(port)?;

        tracing::info!(
            session_id = self.session.id,
            channel_id = %channel_id,
            port = port,
            "Listening for media"
        );

        self.send(&format!("{} {}", RESPONSE_OK, port)).await
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        let mut line = String::with_capacity(message.len() + LINE_ENDING.len());
        line.push_str(message);
        line.push_str(LINE_ENDING);
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.session.close();
        self.cancel.cancel();

        if let Some(task) = self.media_task.take() {
            let _ = task.await;
        }
        self.routing = None;

        if let Some(stream) = self.stream.take() {
            if !stream.is_stopped() {
                if let Err(e) = self.registry.stop_stream(stream.channel_id()).await {
                    tracing::warn!(
                        session_id = self.session.id,
                        channel_id = %stream.channel_id(),
                        error = %e,
                        "Error stopping stream"
                    );
                }
            }
        }

        let _ = self.writer.shutdown().await;
        tracing::debug!(
            session_id = self.session.id,
            duration = ?self.session.duration(),
            "Handshake connection closed"
        );
    }
}

/// Reads RTP datagrams from a publisher's media port
struct MediaLoop {
    session_id: u64,
    socket: UdpSocket,
    stream: Arc<Stream>,
    routing: watch::Receiver<PayloadRouting>,
    keyframes: KeyframeCollector,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl MediaLoop {
    async fn run(mut self) {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.stream.stopped() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let result = match received {
                Ok((len, _)) => self.handle_datagram(&buf[..len]).await,
                Err(e) => Err(e.into()),
            };

            if let Err(e) = result {
                tracing::error!(
                    session_id = self.session_id,
                    channel_id = %self.stream.channel_id(),
                    error = %e,
                    "Media read failed"
                );
                self.cancel.cancel();
                break;
            }
        }

        tracing::debug!(session_id = self.session_id, "Media loop stopped");
    }

    async fn handle_datagram(&mut self, datagram: &[u8]) -> Result<()> {
        let mut raw = datagram;
        let packet = match Packet::unmarshal(&mut raw) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::trace!(
                    session_id = self.session_id,
                    error = %e,
                    "Dropping malformed datagram"
                );
                return Ok(());
            }
        };
        self.stream.mark_media_started();

        let route = self.routing.borrow().route(packet.header.payload_type);
        let tracks = self.stream.tracks();
        match route {
            Route::Video => {
                tracks.video.write_rtp(&packet).await.map_err(track_write)?;
                self.stream.counters().record_video(datagram.len());
                if let Some(keyframe) = self.keyframes.push(&packet) {
                    self.stream.set_keyframe(keyframe);
                }
            }
            Route::Audio => {
                tracks.audio.write_rtp(&packet).await.map_err(track_write)?;
                self.stream.counters().record_audio(datagram.len());
            }
            Route::Drop => {}
        }

        Ok(())
    }
}

fn track_write(e: webrtc::Error) -> Error {
    ProtocolError::TrackWrite(e.to_string()).into()
}
