//! Control sessions and their lifecycle.
//!
//! One control connection carries one session. The serving side runs
//! [`ServerSession::run`] on the connection until the peer goes away;
//! the requesting side drives it through [`ClientSession`].
//!
//! ## Lifecycle
//!
//! ```text
//! SETUP       Init -> Ready                media plane bound
//! PLAY        Ready -> Playing             frames flow out to the peer
//! RECORD      Ready -> Recording           frames flow in from the peer
//! PAUSE       Playing | Recording -> Ready
//! TEARDOWN    any -> Init                  media plane torn down
//! DESCRIBE    any state                    stream description returned
//! disconnect  any -> gone                  implicit teardown
//! ```
//!
//! A request that is not valid in the current state is logged and
//! dropped; nothing goes back on the wire for it.

pub mod client;

use std::fmt;
use std::io::{BufReader, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rand::RngExt;

use crate::config::{ClientConfig, StreamConfig};
use crate::congestion::{CongestionController, CongestionMonitor};
use crate::error::{Result, StreamError};
use crate::feedback::FeedbackReceiver;
use crate::media::{FrameCompressor, FrameSynchronizer, SyncSource};
use crate::protocol::describe::describe_response;
use crate::protocol::{ControlRequest, ControlResponse, Method};
use crate::rtp::{RtpSender, SeqExtender};
use crate::runtime::TaskHandle;
use crate::wire::rtp::RtpPacket;

pub use client::ClientSession;

/// Lifecycle state of a control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection open, no media plane yet.
    Init,
    /// Media plane bound via SETUP; no frames moving.
    Ready,
    /// Frames flowing out to the session's peer.
    Playing,
    /// Frames flowing in from the session's peer.
    Recording,
}

/// Random 64-bit session identifier, rendered as 16 hex digits in the
/// `Session` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn generate() -> Self {
        Self(rand::rng().random::<u64>())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Relay-server pieces shared with every session it accepts.
#[derive(Clone)]
pub struct SessionContext {
    /// Fan-out channel that recorded frames are pushed into.
    pub forward: Sender<RtpPacket>,
    /// Re-encoder used by each session's congestion controller.
    pub compressor: Arc<Mutex<Box<dyn FrameCompressor>>>,
    /// Media-plane parameters applied to the session.
    pub config: StreamConfig,
    /// TCP port of the control listener, advertised in DESCRIBE.
    pub control_port: u16,
}

/// Send half of a session's media plane, built during SETUP.
struct MediaPlane {
    sender: RtpSender,
    feedback: FeedbackReceiver,
    controller: Arc<CongestionController>,
}

impl MediaPlane {
    fn start(&mut self) {
        self.sender.start();
        self.feedback.start();
        self.controller.start(self.sender.pace_handle());
    }

    fn stop(&mut self) {
        self.sender.stop();
        self.feedback.stop();
        self.controller.stop();
    }
}

/// Serving half of one control connection.
///
/// Comes in two flavors. A relay session ([`new`](Self::new)) sends
/// frames fanned out by a [`StreamServer`](crate::StreamServer) and can
/// ingest a recorded feed back into it. A standalone session
/// ([`with_sync`](Self::with_sync)) sends frames straight out of a local
/// [`FrameSynchronizer`]; the recording client runs one on its reverse
/// connection.
pub struct ServerSession {
    id: SessionId,
    state: Arc<RwLock<SessionState>>,
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    peer_ip: IpAddr,
    config: StreamConfig,
    control_port: u16,
    compressor: Arc<Mutex<Box<dyn FrameCompressor>>>,
    sync: Arc<FrameSynchronizer>,
    frames: Option<Receiver<RtpPacket>>,
    forward: Option<Sender<RtpPacket>>,
    reverse_port: Option<u16>,
    media: Option<MediaPlane>,
    loader: Option<TaskHandle>,
    reverse: Option<ClientSession>,
}

impl ServerSession {
    /// Relay session over an accepted control connection.
    ///
    /// `state` is shared with the fan-out dispatcher, which only routes
    /// frames to sessions it reads as [`SessionState::Playing`].
    pub fn new(
        stream: TcpStream,
        id: SessionId,
        state: Arc<RwLock<SessionState>>,
        frames: Receiver<RtpPacket>,
        context: &SessionContext,
    ) -> Result<Self> {
        let peer_ip = stream.peer_addr()?.ip();
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            id,
            state,
            stream,
            reader,
            peer_ip,
            config: context.config.clone(),
            control_port: context.control_port,
            compressor: context.compressor.clone(),
            sync: Arc::new(FrameSynchronizer::new()),
            frames: Some(frames),
            forward: Some(context.forward.clone()),
            reverse_port: None,
            media: None,
            loader: None,
            reverse: None,
        })
    }

    /// Standalone session sending frames straight out of `sync`.
    ///
    /// Whoever owns `sync` keeps filling it; the peer pulls the feed with
    /// an ordinary SETUP / PLAY exchange. RECORD is not served here.
    pub fn with_sync(
        stream: TcpStream,
        sync: Arc<FrameSynchronizer>,
        compressor: Arc<Mutex<Box<dyn FrameCompressor>>>,
        config: StreamConfig,
    ) -> Result<Self> {
        let control_port = stream.local_addr()?.port();
        let peer_ip = stream.peer_addr()?.ip();
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            id: SessionId::generate(),
            state: Arc::new(RwLock::new(SessionState::Init)),
            stream,
            reader,
            peer_ip,
            config,
            control_port,
            compressor,
            sync,
            frames: None,
            forward: None,
            reverse_port: None,
            media: None,
            loader: None,
            reverse: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Serves control requests until the peer disconnects.
    ///
    /// A disconnect in any state is an implicit teardown: every worker of
    /// the session has stopped by the time this returns.
    pub fn run(&mut self) {
        tracing::info!(session_id = %self.id, peer = %self.peer_ip, "session opened");
        loop {
            match ControlRequest::read(&mut self.reader) {
                Ok(Some(request)) => self.dispatch(request),
                Ok(None) => {
                    tracing::info!(session_id = %self.id, "peer disconnected");
                    break;
                }
                Err(StreamError::Io(error)) => {
                    tracing::warn!(session_id = %self.id, %error, "control read failed");
                    break;
                }
                Err(error) => {
                    tracing::warn!(session_id = %self.id, %error, "ignoring malformed request");
                }
            }
        }
        self.shutdown();
        self.set_state(SessionState::Init);
        tracing::info!(session_id = %self.id, "session closed");
    }

    fn dispatch(&mut self, request: ControlRequest) {
        let state = *self.state.read();
        tracing::debug!(
            session_id = %self.id,
            method = request.method.as_str(),
            cseq = request.cseq,
            ?state,
            "request received"
        );
        let outcome = match (request.method, state) {
            (Method::Describe, _) => self.handle_describe(&request),
            (Method::Setup, SessionState::Init) => self.handle_setup(&request),
            (Method::Play, SessionState::Ready) => self.handle_play(&request),
            (Method::Record, SessionState::Ready) => self.handle_record(&request),
            (Method::Pause, SessionState::Playing | SessionState::Recording) => {
                self.handle_pause(&request, state)
            }
            (Method::Teardown, _) => self.handle_teardown(&request),
            (method, state) => {
                tracing::debug!(
                    session_id = %self.id,
                    method = method.as_str(),
                    ?state,
                    "request invalid in this state, dropped"
                );
                Ok(())
            }
        };
        if let Err(error) = outcome {
            tracing::warn!(
                session_id = %self.id,
                method = request.method.as_str(),
                %error,
                "request handling failed"
            );
        }
    }

    /// Binds the media plane towards the peer's advertised media port and
    /// reports our feedback port back.
    fn handle_setup(&mut self, request: &ControlRequest) -> Result<()> {
        let Some((media_port, reverse_port)) = request.client_ports() else {
            tracing::warn!(session_id = %self.id, "SETUP without usable transport ports, dropped");
            return Ok(());
        };

        let monitor = Arc::new(CongestionMonitor::new());
        let controller = Arc::new(CongestionController::new(
            monitor.clone(),
            self.compressor.clone(),
            self.config.frame_period,
            self.config.congestion_interval,
        ));
        let feedback = FeedbackReceiver::bind(monitor, self.config.feedback_poll)?;
        let feedback_port = feedback.local_port()?;

        let peer = SocketAddr::new(self.peer_ip, media_port);
        let sender = RtpSender::connect(
            peer,
            Box::new(SyncSource::new(self.sync.clone())),
            controller.clone(),
            &self.config,
        )?;

        self.media = Some(MediaPlane {
            sender,
            feedback,
            controller,
        });
        self.reverse_port = reverse_port;
        self.set_state(SessionState::Ready);
        tracing::info!(session_id = %self.id, %peer, feedback_port, "session ready");

        let response = self
            .session_ok(request.cseq)
            .add_header("Transport", format!("server_port={feedback_port}"));
        self.respond(response)
    }

    fn handle_play(&mut self, request: &ControlRequest) -> Result<()> {
        if self.media.is_none() {
            tracing::debug!(session_id = %self.id, "PLAY with no media plane, dropped");
            return Ok(());
        }
        self.start_loader();
        if let Some(media) = self.media.as_mut() {
            media.start();
        }
        self.set_state(SessionState::Playing);
        tracing::info!(session_id = %self.id, "playing");
        self.respond(self.session_ok(request.cseq))
    }

    /// Pulls the peer's recorded feed by dialing its reverse port and
    /// running a forwarding client session against it.
    fn handle_record(&mut self, request: &ControlRequest) -> Result<()> {
        let Some(forward) = self.forward.clone() else {
            tracing::debug!(session_id = %self.id, "RECORD not served here, dropped");
            return Ok(());
        };
        if let Some(reverse) = self.reverse.as_mut() {
            reverse.play()?;
        } else {
            let Some(port) = self.reverse_port else {
                tracing::warn!(session_id = %self.id, "RECORD without a reverse port, dropped");
                return Ok(());
            };
            let peer = SocketAddr::new(self.peer_ip, port);
            tracing::info!(session_id = %self.id, %peer, "pulling recorded feed");
            let config = ClientConfig {
                resource: request.resource.clone(),
                display_interval: self.config.frame_period,
                stream: self.config.clone(),
            };
            let mut reverse = ClientSession::connect_forward(peer, config, forward)?;
            reverse.setup()?;
            reverse.play()?;
            self.reverse = Some(reverse);
        }
        self.set_state(SessionState::Recording);
        tracing::info!(session_id = %self.id, "recording");
        self.respond(self.session_ok(request.cseq))
    }

    fn handle_pause(&mut self, request: &ControlRequest, state: SessionState) -> Result<()> {
        match state {
            SessionState::Playing => {
                if let Some(media) = self.media.as_mut() {
                    media.stop();
                }
                // The loader keeps buffering across the pause.
            }
            SessionState::Recording => {
                if let Some(reverse) = self.reverse.as_mut() {
                    reverse.pause()?;
                }
            }
            _ => {}
        }
        self.set_state(SessionState::Ready);
        tracing::info!(session_id = %self.id, "paused");
        self.respond(self.session_ok(request.cseq))
    }

    fn handle_teardown(&mut self, request: &ControlRequest) -> Result<()> {
        self.shutdown();
        self.set_state(SessionState::Init);
        tracing::info!(session_id = %self.id, "torn down");
        self.respond(self.session_ok(request.cseq))
    }

    fn handle_describe(&mut self, request: &ControlRequest) -> Result<()> {
        let response = describe_response(
            request.cseq,
            self.id,
            &request.resource,
            self.control_port,
            self.config.payload_type,
        );
        self.respond(response)
    }

    /// Drains the session's private fan-out channel into its reorder
    /// buffer. Relay sessions only; runs from first PLAY until teardown.
    fn start_loader(&mut self) {
        if self.loader.is_some() {
            return;
        }
        let Some(frames) = self.frames.clone() else {
            return;
        };
        let sync = self.sync.clone();
        let mut extender = SeqExtender::new();
        self.loader = Some(TaskHandle::spawn_consumer(
            "frame-loader",
            frames,
            move |packet: RtpPacket| {
                let seq = extender.extend(packet.header.sequence_number);
                sync.add_frame(seq, packet.payload);
            },
        ));
    }

    /// Stops every worker and drops the media plane.
    fn shutdown(&mut self) {
        if let Some(mut loader) = self.loader.take() {
            loader.stop();
        }
        if let Some(mut media) = self.media.take() {
            media.stop();
        }
        if let Some(mut reverse) = self.reverse.take() {
            if let Err(error) = reverse.teardown() {
                tracing::debug!(session_id = %self.id, %error, "reverse teardown failed");
            }
        }
        self.reverse_port = None;
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!(session_id = %self.id, previous = ?*state, next = ?next, "state transition");
        }
        *state = next;
    }

    fn session_ok(&self, cseq: u32) -> ControlResponse {
        ControlResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", self.id)
    }

    fn respond(&mut self, response: ControlResponse) -> Result<()> {
        self.stream.write_all(response.serialize().as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ErrorKind, Read};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use crate::media::PassthroughCompressor;

    fn spawn_standalone() -> (TcpStream, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (conn, _) = listener.accept().unwrap();
        let compressor: Arc<Mutex<Box<dyn FrameCompressor>>> =
            Arc::new(Mutex::new(Box::new(PassthroughCompressor)));
        let mut session = ServerSession::with_sync(
            conn,
            Arc::new(FrameSynchronizer::new()),
            compressor,
            StreamConfig::default(),
        )
        .unwrap();
        let handle = thread::spawn(move || session.run());
        (client, handle)
    }

    fn raw_exchange(stream: &mut TcpStream, request: &str) -> String {
        stream.write_all(request.as_bytes()).unwrap();
        let mut buf = [0u8; 2048];
        let n = stream.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[test]
    fn session_id_renders_as_16_hex_digits() {
        let id = SessionId::generate().to_string();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn setup_reports_feedback_port_and_session() {
        let (mut client, handle) = spawn_standalone();
        let reply = raw_exchange(
            &mut client,
            "SETUP stream RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/UDP;client_port=45999\r\n",
        );
        assert!(reply.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(reply.contains("CSeq: 1\r\n"));
        assert!(reply.contains("Session: "));
        assert!(reply.contains("server_port="));

        let reply = raw_exchange(
            &mut client,
            "TEARDOWN stream RTSP/1.0\r\nCSeq: 2\r\nSession: ignored\r\n",
        );
        assert!(reply.starts_with("RTSP/1.0 200 OK\r\n"));
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn describe_lists_the_stream() {
        let (mut client, handle) = spawn_standalone();
        let reply = raw_exchange(
            &mut client,
            "DESCRIBE stream RTSP/1.0\r\nCSeq: 7\r\nAccept: application/sdp\r\n",
        );
        assert!(reply.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(reply.contains("Content-Type: application/sdp\r\n"));
        assert!(reply.contains("m=video "));
        assert!(reply.contains("video/MJPEG"));
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn out_of_state_request_gets_no_reply() {
        let (mut client, handle) = spawn_standalone();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        client
            .write_all(b"PLAY stream RTSP/1.0\r\nCSeq: 1\r\nSession: none\r\n")
            .unwrap();
        let mut buf = [0u8; 64];
        match client.read(&mut buf) {
            Err(error) => {
                assert!(matches!(
                    error.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut
                ));
            }
            Ok(n) => panic!("expected silence, got {n} bytes"),
        }
        drop(client);
        handle.join().unwrap();
    }
}
