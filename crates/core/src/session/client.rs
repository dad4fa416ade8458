//! Requesting side of a control session.
//!
//! A [`ClientSession`] owns the control connection and every local
//! media worker: the receive loop, the feedback reporter, the display
//! pump, and — while recording — the capture pump plus a standalone
//! [`ServerSession`] that serves the captured feed back over the
//! reverse connection.

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{Result, StreamError};
use crate::feedback::FeedbackSender;
use crate::media::{
    FrameCompressor, FramePull, FrameSink, FrameSource, FrameSynchronizer, StatsSink,
};
use crate::protocol::{Method, ResponseFields, format_request};
use crate::rtp::{Delivery, ReceiverStats, RtpReceiver};
use crate::runtime::TaskHandle;
use crate::session::{ServerSession, SessionState};
use crate::wire::rtp::RtpPacket;

/// Largest control response read in one call.
const RESPONSE_BUFFER_LEN: usize = 10_240;

/// How long to wait for the peer to dial the reverse connection after a
/// RECORD request went out.
const REVERSE_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where this endpoint puts the frames it receives.
enum Output {
    /// Reorder into a synchronizer and show on a sink. The viewing path.
    Display {
        sync: Arc<FrameSynchronizer>,
        sink: Arc<Mutex<Box<dyn FrameSink>>>,
        stats_sink: Option<Arc<Mutex<Box<dyn StatsSink>>>>,
    },
    /// Push whole packets into a channel. The relay-ingest path.
    Forward { frames: Sender<RtpPacket> },
}

/// Capture-side machinery of a recording session.
///
/// The pump moves frames from the source into `sync`; the standalone
/// server session drains `sync` towards the peer. Both outlive a pause,
/// so resuming continues the same feed.
struct ReverseFeed {
    sync: Arc<FrameSynchronizer>,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    next_seq: Arc<AtomicU64>,
    pump: Option<TaskHandle>,
    server: Option<JoinHandle<()>>,
}

/// Client endpoint of one control session.
///
/// Methods mirror the protocol verbs. Each checks the local lifecycle
/// state first and skips the exchange when the verb is not valid, since
/// the peer would silently drop it anyway.
pub struct ClientSession {
    stream: TcpStream,
    peer_ip: IpAddr,
    config: ClientConfig,
    state: SessionState,
    cseq: u32,
    session_id: String,
    output: Output,
    stats: Arc<ReceiverStats>,
    receiver: Option<RtpReceiver>,
    feedback: Option<FeedbackSender>,
    display: Option<TaskHandle>,
    reverse_listener: Option<TcpListener>,
    reverse: Option<ReverseFeed>,
}

impl ClientSession {
    /// Connects a viewing client. Frames arriving after
    /// [`play`](Self::play) are reordered and handed to `sink`.
    pub fn connect(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self> {
        let output = Output::Display {
            sync: Arc::new(FrameSynchronizer::new()),
            sink: Arc::new(Mutex::new(sink)),
            stats_sink: None,
        };
        Self::connect_with(addr, config, output)
    }

    /// Connects a forwarding client: every received packet is pushed
    /// into `frames` as-is. The relay server uses this to ingest a
    /// recorded feed.
    pub(crate) fn connect_forward(
        addr: SocketAddr,
        config: ClientConfig,
        frames: Sender<RtpPacket>,
    ) -> Result<Self> {
        Self::connect_with(addr, config, Output::Forward { frames })
    }

    fn connect_with(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
        output: Output,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let peer_ip = stream.peer_addr()?.ip();
        tracing::info!(peer = %peer_ip, resource = %config.resource, "control connection opened");
        Ok(Self {
            stream,
            peer_ip,
            config,
            state: SessionState::Init,
            cseq: 0,
            session_id: String::new(),
            output,
            stats: Arc::new(ReceiverStats::new()),
            receiver: None,
            feedback: None,
            display: None,
            reverse_listener: None,
            reverse: None,
        })
    }

    /// Attaches a statistics sink; per-frame delivery stats are pushed
    /// to it while playing. Call before [`setup`](Self::setup).
    pub fn with_stats_sink(mut self, sink: Box<dyn StatsSink>) -> Self {
        if let Output::Display { stats_sink, .. } = &mut self.output {
            *stats_sink = Some(Arc::new(Mutex::new(sink)));
        }
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session identifier assigned by the peer at SETUP. Empty before.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Delivery accounting for this endpoint's receive path.
    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Negotiates transport: binds the media receive socket, reserves
    /// the reverse listener, and learns the peer's feedback port.
    pub fn setup(&mut self) -> Result<()> {
        if self.state != SessionState::Init {
            tracing::debug!(state = ?self.state, "setup skipped");
            return Ok(());
        }
        let delivery = match &self.output {
            Output::Display {
                sync, stats_sink, ..
            } => Delivery::Buffer {
                sync: sync.clone(),
                stats_sink: stats_sink.clone(),
            },
            Output::Forward { frames } => Delivery::Forward {
                frames: frames.clone(),
            },
        };
        let receiver = RtpReceiver::bind(delivery, self.stats.clone(), &self.config.stream)?;
        let media_port = receiver.local_port()?;

        // A viewer reserves a listener for the role flip RECORD brings;
        // a forwarding client has no capture side and advertises only
        // its media port.
        let transport = if matches!(self.output, Output::Display { .. }) {
            let listener = TcpListener::bind("0.0.0.0:0")?;
            let reverse_port = listener.local_addr()?.port();
            self.reverse_listener = Some(listener);
            format!("Transport: RTP/UDP;client_port={media_port},{reverse_port}")
        } else {
            format!("Transport: RTP/UDP;client_port={media_port}")
        };

        let fields = self.exchange(Method::Setup, &transport)?;
        if fields.status_code != 200 {
            tracing::warn!(status = fields.status_code, "SETUP refused");
            return Ok(());
        }
        if let Some(id) = fields.token(6) {
            self.session_id = id.to_string();
        }
        match fields
            .parameter(8, "server_port")
            .and_then(|values| values.first().and_then(|value| value.parse().ok()))
        {
            Some(port) => {
                let peer = SocketAddr::new(self.peer_ip, port);
                self.feedback = Some(FeedbackSender::connect(
                    peer,
                    self.stats.clone(),
                    self.config.stream.feedback_interval,
                )?);
            }
            None => tracing::warn!("SETUP response carried no feedback port"),
        }
        self.receiver = Some(receiver);
        self.state = SessionState::Ready;
        tracing::info!(session_id = %self.session_id, media_port, "session ready");
        Ok(())
    }

    /// Starts media flowing in: the receive loop, loss feedback, and
    /// (for a viewer) the display pump.
    pub fn play(&mut self) -> Result<()> {
        if self.state != SessionState::Ready {
            tracing::debug!(state = ?self.state, "play skipped");
            return Ok(());
        }
        let attribute = self.session_attribute();
        let fields = self.exchange(Method::Play, &attribute)?;
        if fields.status_code != 200 {
            tracing::warn!(status = fields.status_code, "PLAY refused");
            return Ok(());
        }
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.start();
        }
        if let Some(feedback) = self.feedback.as_mut() {
            feedback.start();
        }
        self.start_display();
        self.state = SessionState::Playing;
        tracing::info!(session_id = %self.session_id, "playing");
        Ok(())
    }

    /// Flips the session into a capture role: the peer dials back on the
    /// reverse listener and pulls frames captured from `source`, while
    /// the local sink keeps previewing them.
    ///
    /// `source` and `compressor` are consumed on the first call; a later
    /// `record` after a pause resumes the original capture and drops the
    /// freshly passed pair.
    pub fn record(
        &mut self,
        source: Box<dyn FrameSource>,
        compressor: Box<dyn FrameCompressor>,
    ) -> Result<()> {
        if self.state != SessionState::Ready {
            tracing::debug!(state = ?self.state, "record skipped");
            return Ok(());
        }
        if self.reverse.is_none() && self.reverse_listener.is_none() {
            tracing::warn!("record needs the reverse listener reserved at setup");
            return Ok(());
        }

        let attribute = self.session_attribute();
        self.send_request(Method::Record, &attribute)?;

        // The response only comes back once the peer has pulled our
        // reverse feed up, so serve the reverse connection first.
        if self.reverse.is_none()
            && let Some(listener) = self.reverse_listener.as_ref()
        {
            let conn = accept_reverse(listener)?;
            let sync = Arc::new(FrameSynchronizer::new());
            let compressor: Arc<Mutex<Box<dyn FrameCompressor>>> =
                Arc::new(Mutex::new(compressor));
            let mut server = ServerSession::with_sync(
                conn,
                sync.clone(),
                compressor,
                self.config.stream.clone(),
            )?;
            let server = thread::spawn(move || server.run());
            self.reverse = Some(ReverseFeed {
                sync,
                source: Arc::new(Mutex::new(source)),
                next_seq: Arc::new(AtomicU64::new(1)),
                pump: None,
                server: Some(server),
            });
        }

        let raw = self.read_response()?;
        let fields = ResponseFields::parse(&raw)?;
        if fields.status_code != 200 {
            tracing::warn!(status = fields.status_code, "RECORD refused");
            return Ok(());
        }
        self.start_capture();
        self.state = SessionState::Recording;
        tracing::info!(session_id = %self.session_id, "recording");
        Ok(())
    }

    /// Halts media flow in either direction, keeping the session
    /// resumable with another PLAY or RECORD.
    pub fn pause(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Playing | SessionState::Recording) {
            tracing::debug!(state = ?self.state, "pause skipped");
            return Ok(());
        }
        let attribute = self.session_attribute();
        let fields = self.exchange(Method::Pause, &attribute)?;
        if fields.status_code != 200 {
            tracing::warn!(status = fields.status_code, "PAUSE refused");
            return Ok(());
        }
        if self.state == SessionState::Playing {
            if let Some(receiver) = self.receiver.as_mut() {
                receiver.stop();
            }
            if let Some(feedback) = self.feedback.as_mut() {
                feedback.stop();
            }
        }
        if let Some(reverse) = self.reverse.as_mut()
            && let Some(mut pump) = reverse.pump.take()
        {
            pump.stop();
        }
        if let Some(mut display) = self.display.take() {
            display.stop();
        }
        self.state = SessionState::Ready;
        tracing::info!(session_id = %self.session_id, "paused");
        Ok(())
    }

    /// Ends the session and stops every local worker. Valid from any
    /// state after SETUP.
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == SessionState::Init {
            tracing::debug!("teardown skipped, session not set up");
            return Ok(());
        }
        let attribute = self.session_attribute();
        match self.exchange(Method::Teardown, &attribute) {
            Ok(fields) if fields.status_code != 200 => {
                tracing::warn!(status = fields.status_code, "TEARDOWN refused");
            }
            Err(error) => tracing::warn!(%error, "TEARDOWN exchange failed"),
            Ok(_) => {}
        }
        self.shutdown();
        self.state = SessionState::Init;
        tracing::info!(session_id = %self.session_id, "torn down");
        Ok(())
    }

    /// Fetches the stream description. Valid in any state.
    pub fn describe(&mut self) -> Result<String> {
        self.send_request(Method::Describe, "Accept: application/sdp")?;
        let raw = self.read_response()?;
        let fields = ResponseFields::parse(&raw)?;
        if fields.status_code != 200 {
            tracing::warn!(status = fields.status_code, "DESCRIBE refused");
            return Ok(String::new());
        }
        // Headers and body arrive in one read; the body starts at the
        // version line.
        let body = raw
            .find("v=0")
            .map(|at| raw[at..].to_string())
            .unwrap_or_default();
        Ok(body)
    }

    fn start_display(&mut self) {
        if self.display.is_some() {
            return;
        }
        let Output::Display { sync, sink, .. } = &self.output else {
            return;
        };
        let sync = sync.clone();
        let sink = sink.clone();
        self.display = Some(TaskHandle::spawn_periodic(
            "display",
            self.config.display_interval,
            move || {
                if let Some((_, frame)) = sync.try_next_frame() {
                    sink.lock().show_frame(&frame);
                }
                true
            },
        ));
    }

    fn start_capture(&mut self) {
        let display_sync = match &self.output {
            Output::Display { sync, .. } => Some(sync.clone()),
            Output::Forward { .. } => None,
        };
        let frame_period = self.config.stream.frame_period;
        let Some(reverse) = self.reverse.as_mut() else {
            return;
        };
        if reverse.pump.is_none() {
            let source = reverse.source.clone();
            let capture_sync = reverse.sync.clone();
            let next_seq = reverse.next_seq.clone();
            reverse.pump = Some(TaskHandle::spawn_periodic("capture", frame_period, move || {
                let frame = match source.lock().next_frame() {
                    FramePull::Frame(frame) if !frame.is_empty() => frame,
                    FramePull::Pending => return true,
                    _ => {
                        tracing::info!("capture source exhausted");
                        // An empty frame marks end of stream for the
                        // reverse session's sender.
                        let seq = next_seq.fetch_add(1, Ordering::Relaxed);
                        capture_sync.add_frame(seq, Vec::new());
                        return false;
                    }
                };
                let seq = next_seq.fetch_add(1, Ordering::Relaxed);
                if let Some(display) = &display_sync {
                    display.add_frame(seq, frame.clone());
                }
                capture_sync.add_frame(seq, frame);
                true
            }));
        }
        self.start_display();
    }

    fn shutdown(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
        }
        if let Some(mut feedback) = self.feedback.take() {
            feedback.stop();
        }
        if let Some(mut display) = self.display.take() {
            display.stop();
        }
        if let Some(mut reverse) = self.reverse.take() {
            if let Some(mut pump) = reverse.pump.take() {
                pump.stop();
            }
            if let Some(server) = reverse.server.take() {
                // The peer tears the reverse session down and closes its
                // end, which lets the serving thread exit.
                if server.join().is_err() {
                    tracing::warn!("reverse session thread panicked");
                }
            }
        }
    }

    fn session_attribute(&self) -> String {
        format!("Session: {}", self.session_id)
    }

    fn send_request(&mut self, method: Method, attribute: &str) -> Result<()> {
        self.cseq += 1;
        let request = format_request(method, &self.config.resource, self.cseq, attribute);
        self.stream.write_all(request.as_bytes())?;
        tracing::debug!(method = method.as_str(), cseq = self.cseq, "request sent");
        Ok(())
    }

    fn read_response(&mut self) -> Result<String> {
        let mut buf = vec![0u8; RESPONSE_BUFFER_LEN];
        let n = self.stream.read(&mut buf)?;
        if n == 0 {
            return Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "control connection closed",
            )));
        }
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    fn exchange(&mut self, method: Method, attribute: &str) -> Result<ResponseFields> {
        self.send_request(method, attribute)?;
        let raw = self.read_response()?;
        let fields = ResponseFields::parse(&raw)?;
        tracing::debug!(
            method = method.as_str(),
            status = fields.status_code,
            cseq = fields.token(4),
            "response received"
        );
        Ok(fields)
    }
}

/// Waits for the peer to dial the reverse connection.
fn accept_reverse(listener: &TcpListener) -> Result<TcpStream> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + REVERSE_ACCEPT_TIMEOUT;
    loop {
        match listener.accept() {
            Ok((conn, peer)) => {
                tracing::debug!(%peer, "reverse connection accepted");
                conn.set_nonblocking(false)?;
                return Ok(conn);
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(StreamError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "peer never dialed the reverse connection",
                    )));
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(error) => return Err(error.into()),
        }
    }
}
