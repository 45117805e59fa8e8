//! Message-dialect (RTMP) connection handler
//!
//! The RTMP handshake and chunk/command layer are handled by `rml_rtmp`.
//! This module reacts to its session events: a publish request is
//! authenticated from the publish name and claims the channel in the
//! registry, and every audio/video message is pushed through the
//! transcoding pipeline onto the stream's tracks.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ServerSession, ServerSessionConfig, ServerSessionEvent, ServerSessionResult,
    StreamMetadata as RtmpMetadata,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use webrtc::rtp::packet::Packet;

use crate::error::{AuthError, Error, ProtocolError, Result};
use crate::media::{
    AacData, AudioTag, AudioTranscoder, FrameKind, H264Data, VideoRepacketizer, VideoTag,
};
use crate::registry::track::{audio_ssrc, video_ssrc};
use crate::registry::{ChannelId, Stream, StreamKey, StreamRegistry, TrackKind};
use crate::server::config::ServerConfig;
use crate::server::sampler::ConnectionSampler;
use crate::server::wait_stopped;
use crate::session::MediaAccounting;

/// Read buffer for the RTMP socket
const READ_BUFFER_SIZE: usize = 4096;

/// Split a publish name of the form `<channel>-<key>`
///
/// Only the first `-` separates; the key may contain further dashes.
pub fn parse_publish_name(name: &str) -> std::result::Result<(ChannelId, StreamKey), AuthError> {
    let (channel, key) = name
        .split_once('-')
        .ok_or(AuthError::InvalidPublishName)?;
    let channel_id = channel
        .parse::<ChannelId>()
        .map_err(|_| AuthError::InvalidPublishName)?;
    if key.is_empty() {
        return Err(AuthError::InvalidPublishName);
    }
    Ok((channel_id, StreamKey::from(key)))
}

/// State of an accepted publish
struct Publish {
    stream: Arc<Stream>,
    audio: AudioTranscoder,
    video: VideoRepacketizer,
    accounting: Arc<MediaAccounting>,
    sampler_cancel: CancellationToken,
    sampler: JoinHandle<()>,
}

impl Publish {
    async fn write(&self, kind: TrackKind, packets: Vec<Packet>) -> Result<()> {
        let tracks = self.stream.tracks();
        let track = match kind {
            TrackKind::Video => &tracks.video,
            TrackKind::Audio => &tracks.audio,
        };

        for packet in &packets {
            track
                .write_rtp(packet)
                .await
                .map_err(|e| ProtocolError::TrackWrite(e.to_string()))?;

            let size = packet.payload.len();
            self.accounting.record_packet(size);
            match kind {
                TrackKind::Video => self.stream.counters().record_video(size),
                TrackKind::Audio => self.stream.counters().record_audio(size),
            }
        }
        if !packets.is_empty() {
            self.stream.mark_media_started();
        }
        Ok(())
    }

    /// Media callbacks fail once the sampler has flagged the connection
    fn ensure_healthy(&self) -> Result<()> {
        if self.accounting.is_errored() {
            return Err(AuthError::NotAuthenticated.into());
        }
        Ok(())
    }
}

/// A message-dialect connection
pub struct MessageConnection {
    session_id: u64,
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    cancel: CancellationToken,
    publish: Option<Publish>,
}

impl MessageConnection {
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        registry: Arc<StreamRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            socket,
            peer_addr,
            config,
            registry,
            cancel,
            publish: None,
        }
    }

    /// Serve the connection until it closes, then tear down its stream
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;
        self.close().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        let Some(remaining) = self.handshake(&mut buf).await? else {
            return Ok(());
        };

        let (mut session, initial) =
            ServerSession::new(ServerSessionConfig::new()).map_err(session_error)?;
        self.process_results(&mut session, initial).await?;

        if !remaining.is_empty() {
            let results = session.handle_input(&remaining).map_err(session_error)?;
            self.process_results(&mut session, results).await?;
        }

        loop {
            let stream = self.publish.as_ref().map(|p| Arc::clone(&p.stream));

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),

                _ = wait_stopped(stream) => {
                    tracing::info!(session_id = self.session_id, "Stream stopped, closing connection");
                    return Ok(());
                }

                read = self.socket.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        tracing::debug!(session_id = self.session_id, "Peer closed connection");
                        return Ok(());
                    }
                    let results = session.handle_input(&buf[..n]).map_err(session_error)?;
                    self.process_results(&mut session, results).await?;
                }
            }
        }
    }

    /// Complete the RTMP handshake; returns bytes received past its end
    async fn handshake(&mut self, buf: &mut [u8]) -> Result<Option<Vec<u8>>> {
        let mut handshake = Handshake::new(PeerType::Server);

        loop {
            let n = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                read = self.socket.read(buf) => read?,
            };
            if n == 0 {
                return Err(Error::Session("connection closed during handshake".into()));
            }

            match handshake.process_bytes(&buf[..n]).map_err(session_error)? {
                HandshakeProcessResult::InProgress { response_bytes } => {
                    self.socket.write_all(&response_bytes).await?;
                }
                HandshakeProcessResult::Completed {
                    response_bytes,
                    remaining_bytes,
                } => {
                    self.socket.write_all(&response_bytes).await?;
                    tracing::debug!(
                        session_id = self.session_id,
                        peer = %self.peer_addr,
                        "Handshake completed"
                    );
                    return Ok(Some(remaining_bytes));
                }
            }
        }
    }

    async fn process_results(
        &mut self,
        session: &mut ServerSession,
        results: Vec<ServerSessionResult>,
    ) -> Result<()> {
        for result in results {
            match result {
                ServerSessionResult::OutboundResponse(packet) => {
                    self.socket.write_all(&packet.bytes).await?;
                }
                ServerSessionResult::RaisedEvent(event) => {
                    if let Some(request_id) = self.handle_event(event).await? {
                        let accepted = session.accept_request(request_id).map_err(session_error)?;
                        for result in accepted {
                            if let ServerSessionResult::OutboundResponse(packet) = result {
                                self.socket.write_all(&packet.bytes).await?;
                            }
                        }
                    }
                }
                ServerSessionResult::UnhandleableMessageReceived(_) => {
                    tracing::trace!(session_id = self.session_id, "Unhandleable message");
                }
            }
        }
        Ok(())
    }

    /// Handle a session event; returns a request to accept, if any
    async fn handle_event(&mut self, event: ServerSessionEvent) -> Result<Option<u32>> {
        match event {
            ServerSessionEvent::ConnectionRequested {
                request_id,
                app_name,
            } => {
                tracing::debug!(session_id = self.session_id, app = %app_name, "Connect requested");
                Ok(Some(request_id))
            }

            ServerSessionEvent::PublishStreamRequested {
                request_id,
                stream_key,
                ..
            } => {
                self.on_publish(&stream_key).await?;
                Ok(Some(request_id))
            }

            ServerSessionEvent::PublishStreamFinished { .. } => {
                tracing::info!(session_id = self.session_id, "Publish finished");
                self.cancel.cancel();
                Ok(None)
            }

            ServerSessionEvent::StreamMetadataChanged { metadata, .. } => {
                self.on_metadata(&metadata);
                Ok(None)
            }

            ServerSessionEvent::AudioDataReceived { data, .. } => {
                let result = self.on_audio(data).await;
                self.absorb_recoverable(result)?;
                Ok(None)
            }

            ServerSessionEvent::VideoDataReceived {
                data, timestamp, ..
            } => {
                let result = self.on_video(data, timestamp.value).await;
                self.absorb_recoverable(result)?;
                Ok(None)
            }

            other => {
                tracing::trace!(session_id = self.session_id, event = ?other, "Unhandled RTMP event");
                Ok(None)
            }
        }
    }

    async fn on_publish(&mut self, publish_name: &str) -> Result<()> {
        if self.publish.is_some() {
            return Err(Error::Session("connection is already publishing".into()));
        }

        let (channel_id, key) = parse_publish_name(publish_name)?;
        self.registry.authenticate(channel_id, &key).await?;

        let audio = AudioTranscoder::new(audio_ssrc(channel_id), self.config.mtu)?;
        let video = VideoRepacketizer::new(video_ssrc(channel_id), self.config.mtu);

        let stream = self.registry.start_stream(channel_id).await?;

        let accounting = Arc::new(MediaAccounting::new());
        let sampler_cancel = CancellationToken::new();
        let sampler = ConnectionSampler::new(
            self.session_id,
            channel_id,
            Arc::clone(&self.registry),
            Arc::clone(&accounting),
            self.config.bandwidth_limit,
            self.config.metadata_failure_limit,
        )
        .spawn(self.config.sample_interval, sampler_cancel.clone());

        tracing::info!(
            session_id = self.session_id,
            channel_id = %channel_id,
            peer = %self.peer_addr,
            "Publisher authenticated"
        );

        self.publish = Some(Publish {
            stream,
            audio,
            video,
            accounting,
            sampler_cancel,
            sampler,
        });
        Ok(())
    }

    fn on_metadata(&self, metadata: &RtmpMetadata) {
        let Some(publish) = &self.publish else {
            return;
        };
        publish.stream.update_client_info(|info| {
            if let Some(encoder) = &metadata.encoder {
                info.vendor_name = encoder.clone();
            }
            if let Some(width) = metadata.video_width {
                info.video_width = width;
            }
            if let Some(height) = metadata.video_height {
                info.video_height = height;
            }
        });
    }

    async fn on_audio(&mut self, data: Bytes) -> Result<()> {
        let publish = self.publish.as_mut().ok_or(AuthError::NotAuthenticated)?;
        publish.ensure_healthy()?;

        let tag = AudioTag::parse(data)?;
        let aac = AacData::parse(tag.body)?;
        if !aac.is_sequence_header() {
            publish.accounting.record_audio_frame();
        }

        let packets = publish.audio.process(aac)?;
        publish.write(TrackKind::Audio, packets).await
    }

    async fn on_video(&mut self, data: Bytes, timestamp_ms: u32) -> Result<()> {
        let publish = self.publish.as_mut().ok_or(AuthError::NotAuthenticated)?;
        publish.ensure_healthy()?;

        let tag = VideoTag::parse(data)?;
        let kind = tag.frame_kind();
        let h264 = H264Data::parse(tag.body)?;
        let is_frame = matches!(h264, H264Data::Frame { .. });
        if is_frame {
            publish.accounting.record_video_frame(kind);
        }

        let packets = publish.video.process(kind, h264, timestamp_ms)?;
        if is_frame && kind == FrameKind::Key {
            if let Some(frame) = publish.video.last_full_frame() {
                publish.stream.set_keyframe(frame.clone());
            }
        }

        publish.write(TrackKind::Video, packets).await
    }

    /// Log and drop errors that only affect one media unit
    fn absorb_recoverable(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if e.is_recoverable() => {
                tracing::warn!(session_id = self.session_id, error = %e, "Dropping media unit");
                Ok(())
            }
            other => other,
        }
    }

    async fn close(&mut self) {
        // The sampler must not observe a half torn down stream
        if let Some(publish) = &self.publish {
            publish.sampler_cancel.cancel();
        }
        self.cancel.cancel();

        if let Some(publish) = self.publish.take() {
            let _ = publish.sampler.await;

            if !publish.stream.is_stopped() {
                let channel_id = publish.stream.channel_id();
                if let Err(e) = self.registry.stop_stream(channel_id).await {
                    tracing::warn!(
                        session_id = self.session_id,
                        channel_id = %channel_id,
                        error = %e,
                        "Error stopping stream"
                    );
                }
            }
        }

        let _ = self.socket.shutdown().await;
        tracing::debug!(session_id = self.session_id, "Message connection closed");
    }
}

fn session_error(e: impl std::fmt::Debug) -> Error {
    Error::Session(format!("{:?}", e))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::error::TranscodeError;
    use crate::registry::RegistryConfig;
    use crate::service::mock::{self, Call, CallLog};

    /// AAC raw frame, sent before any sequence header
    const AAC_RAW: &[u8] = &[0xAF, 0x01, 0x21, 0x00];

    /// AVC keyframe NALU, sent before any sequence header
    const AVC_KEYFRAME: &[u8] = &[0x17, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x65, 0x88];

    fn registry() -> (Arc<StreamRegistry>, CallLog) {
        let (service, orchestrator, log) = mock::pair("secret");
        let registry = Arc::new(StreamRegistry::new(
            RegistryConfig::default().heartbeat_interval(Duration::from_secs(3600)),
            service,
            orchestrator,
        ));
        (registry, log)
    }

    /// A server-side connection plus the client socket keeping it open
    async fn connection(
        registry: Arc<StreamRegistry>,
        config: ServerConfig,
    ) -> (MessageConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (socket, peer) = listener.accept().await.unwrap();
        let connection =
            MessageConnection::new(1, socket, peer, config, registry, CancellationToken::new());
        (connection, client)
    }

    fn count(log: &CallLog, pred: impl Fn(&Call) -> bool) -> usize {
        log.lock().iter().filter(|call| pred(*call)).count()
    }

    #[test]
    fn test_parse_publish_name() {
        let (channel, key) = parse_publish_name("42-abc").unwrap();
        assert_eq!(channel, ChannelId(42));
        assert_eq!(key, StreamKey::from("abc"));
    }

    #[test]
    fn test_parse_publish_name_splits_once() {
        let (channel, key) = parse_publish_name("7-ab-cd").unwrap();
        assert_eq!(channel, ChannelId(7));
        assert_eq!(key, StreamKey::from("ab-cd"));
    }

    #[test]
    fn test_parse_publish_name_invalid() {
        for name in ["42", "abc-key", "42-", "-key"] {
            assert!(
                matches!(parse_publish_name(name), Err(AuthError::InvalidPublishName)),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn test_failed_publish_creates_no_stream() {
        let (registry, log) = registry();
        let (mut connection, _client) = connection(Arc::clone(&registry), ServerConfig::local()).await;

        let err = assert_err!(connection.on_publish("42-wrong").await);
        assert!(matches!(err, Error::Auth(AuthError::KeyMismatch)));

        let err = assert_err!(connection.on_publish("no-separator-channel").await);
        assert!(matches!(err, Error::Auth(AuthError::InvalidPublishName)));

        assert!(connection.publish.is_none());
        assert_eq!(registry.stream_count().await, 0);
        assert_eq!(count(&log, |call| matches!(call, Call::StartStream(_))), 0);
    }

    #[tokio::test]
    async fn test_media_before_publish_is_fatal() {
        let (registry, _) = registry();
        let (mut connection, _client) = connection(registry, ServerConfig::local()).await;

        let result = connection.on_audio(Bytes::from_static(AAC_RAW)).await;
        assert!(matches!(result, Err(Error::Auth(AuthError::NotAuthenticated))));
        assert_err!(connection.absorb_recoverable(result));
    }

    #[tokio::test]
    async fn test_transcode_errors_are_absorbed() {
        let (registry, _) = registry();
        let (mut connection, _client) = connection(registry, ServerConfig::local()).await;
        assert_ok!(connection.on_publish("42-secret").await);

        let result = connection.on_audio(Bytes::from_static(AAC_RAW)).await;
        assert!(matches!(
            result,
            Err(Error::Transcode(TranscodeError::DecoderNotConfigured))
        ));
        assert_ok!(connection.absorb_recoverable(result));

        let result = connection.on_video(Bytes::from_static(AVC_KEYFRAME), 0).await;
        assert!(matches!(
            result,
            Err(Error::Transcode(TranscodeError::MissingSequenceHeader))
        ));
        assert_ok!(connection.absorb_recoverable(result));

        // Dropped units are still counted
        let window = connection.publish.as_ref().unwrap().accounting.take_window();
        assert_eq!(window.audio_frames, 1);
        assert_eq!(window.key_frames, 1);
        assert_eq!(window.packets, 0);

        connection.close().await;
    }

    #[tokio::test]
    async fn test_bandwidth_ceiling_fails_next_media() {
        let (registry, _) = registry();
        let config = ServerConfig::local()
            .bandwidth_limit(100)
            .sample_interval(Duration::from_millis(20));
        let (mut connection, _client) = connection(registry, config).await;
        assert_ok!(connection.on_publish("42-secret").await);

        let accounting = Arc::clone(&connection.publish.as_ref().unwrap().accounting);
        accounting.record_packet(500);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(accounting.is_errored());

        let result = connection.on_audio(Bytes::from_static(AAC_RAW)).await;
        assert!(matches!(result, Err(Error::Auth(AuthError::NotAuthenticated))));
        assert_err!(connection.absorb_recoverable(result));

        connection.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_sampler_and_stream_once() {
        let (registry, log) = registry();
        let config = ServerConfig::local().sample_interval(Duration::from_millis(20));
        let (mut connection, _client) = connection(Arc::clone(&registry), config).await;
        assert_ok!(connection.on_publish("42-secret").await);
        let stream = registry.get_stream(ChannelId(42)).await.unwrap();

        connection.close().await;
        assert!(stream.is_stopped());
        assert_eq!(registry.stream_count().await, 0);
        assert_eq!(count(&log, |call| matches!(call, Call::EndStream(_))), 1);

        let pushes = count(&log, |call| matches!(call, Call::UpdateMetadata(_)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            count(&log, |call| matches!(call, Call::UpdateMetadata(_))),
            pushes
        );

        connection.close().await;
        assert_eq!(count(&log, |call| matches!(call, Call::EndStream(_))), 1);
    }

    #[tokio::test]
    async fn test_close_after_external_stop_does_not_stop_again() {
        let (registry, log) = registry();
        let (mut connection, _client) = connection(Arc::clone(&registry), ServerConfig::local()).await;
        assert_ok!(connection.on_publish("42-secret").await);

        assert_ok!(registry.stop_stream(ChannelId(42)).await);
        connection.close().await;

        assert_eq!(count(&log, |call| matches!(call, Call::EndStream(_))), 1);
        assert_eq!(
            count(&log, |call| matches!(call, Call::OrchestratorStop(..))),
            1
        );
    }
}
