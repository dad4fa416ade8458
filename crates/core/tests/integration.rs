//! Integration tests: the control handshake over a raw socket, and a
//! full relay run with a recording endpoint feeding a viewer.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, unbounded};

use rtstream::config::{ClientConfig, ServerConfig, StreamConfig};
use rtstream::media::{FramePull, FrameSink, FrameSource, PassthroughCompressor};
use rtstream::{ClientSession, SessionState, StreamServer};

fn start_server() -> (StreamServer, SocketAddr) {
    let mut server = StreamServer::new(ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    });
    server.start().expect("server start");
    let addr = server.local_addr().expect("server addr");
    (server, addr)
}

fn request(stream: &mut TcpStream, text: &str) -> String {
    stream.write_all(text.as_bytes()).expect("request write");
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).expect("response read");
    String::from_utf8_lossy(&buf[..n]).to_string()
}

#[test]
fn raw_handshake_setup_describe_play_teardown() {
    let (mut server, addr) = start_server();
    let mut stream = TcpStream::connect(addr).expect("connect to server");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let setup_resp = request(
        &mut stream,
        "SETUP stream RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/UDP;client_port=47000,47001\r\n",
    );
    assert!(
        setup_resp.starts_with("RTSP/1.0 200 OK"),
        "SETUP: expected 200 OK, got: {setup_resp:?}"
    );
    assert!(setup_resp.contains("CSeq: 1"), "SETUP: missing CSeq echo");
    assert!(
        setup_resp.contains("Transport: server_port="),
        "SETUP: missing server_port"
    );

    let session_id = setup_resp
        .split_whitespace()
        .nth(6)
        .expect("SETUP: could not parse Session id")
        .to_string();
    assert_eq!(session_id.len(), 16, "SETUP: odd session id {session_id}");

    let desc_resp = request(
        &mut stream,
        "DESCRIBE stream RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n",
    );
    assert!(
        desc_resp.starts_with("RTSP/1.0 200 OK"),
        "DESCRIBE: expected 200 OK, got: {desc_resp:?}"
    );
    assert!(
        desc_resp.contains("Content-Type: application/sdp"),
        "DESCRIBE: missing Content-Type"
    );
    assert!(desc_resp.contains("v=0"), "DESCRIBE: body missing v=0");
    assert!(
        desc_resp.contains("m=video"),
        "DESCRIBE: body missing m=video"
    );
    assert!(
        desc_resp.contains("video/MJPEG"),
        "DESCRIBE: body missing encoding"
    );

    let play_resp = request(
        &mut stream,
        &format!("PLAY stream RTSP/1.0\r\nCSeq: 3\r\nSession: {session_id}\r\n"),
    );
    assert!(
        play_resp.starts_with("RTSP/1.0 200 OK"),
        "PLAY: expected 200 OK, got: {play_resp:?}"
    );

    let teardown_resp = request(
        &mut stream,
        &format!("TEARDOWN stream RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n"),
    );
    assert!(
        teardown_resp.starts_with("RTSP/1.0 200 OK"),
        "TEARDOWN: expected 200 OK, got: {teardown_resp:?}"
    );

    server.stop();
}

#[test]
fn out_of_state_request_is_silently_dropped() {
    let (mut server, addr) = start_server();
    let mut stream = TcpStream::connect(addr).expect("connect to server");
    stream
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();

    stream
        .write_all(b"PLAY stream RTSP/1.0\r\nCSeq: 1\r\nSession: none\r\n")
        .expect("request write");
    let mut buf = [0u8; 256];
    match stream.read(&mut buf) {
        Err(error) => assert!(
            matches!(
                error.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            "unexpected read error: {error}"
        ),
        Ok(n) => panic!("expected silence, got {n} bytes"),
    }

    // The connection stays serviceable afterwards.
    let desc_resp = request(
        &mut stream,
        "DESCRIBE stream RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n",
    );
    assert!(
        desc_resp.starts_with("RTSP/1.0 200 OK"),
        "DESCRIBE after ignored request failed: {desc_resp:?}"
    );

    server.stop();
}

/// Source producing `count` frames whose bytes identify their position.
struct PatternSource {
    next: u8,
    count: u8,
}

impl PatternSource {
    fn new(count: u8) -> Self {
        Self { next: 1, count }
    }
}

impl FrameSource for PatternSource {
    fn next_frame(&mut self) -> FramePull {
        if self.next > self.count {
            return FramePull::Exhausted;
        }
        let frame = vec![self.next; 2000];
        self.next += 1;
        FramePull::Frame(frame)
    }
}

struct CollectingSink {
    frames: Sender<Vec<u8>>,
}

impl FrameSink for CollectingSink {
    fn show_frame(&mut self, frame: &[u8]) {
        let _ = self.frames.send(frame.to_vec());
    }
}

struct NullSink;

impl FrameSink for NullSink {
    fn show_frame(&mut self, _frame: &[u8]) {}
}

#[test]
fn recorded_feed_reaches_a_viewer() {
    let (mut server, addr) = start_server();

    // Viewer first, so it is already playing when the feed starts.
    let (frames_tx, frames_rx) = unbounded();
    let viewer_config = ClientConfig {
        resource: "stream".to_string(),
        display_interval: Duration::from_millis(5),
        stream: StreamConfig::default(),
    };
    let mut viewer = ClientSession::connect(
        addr,
        viewer_config,
        Box::new(CollectingSink { frames: frames_tx }),
    )
    .expect("viewer connect");
    viewer.setup().expect("viewer setup");
    viewer.play().expect("viewer play");
    assert_eq!(viewer.state(), SessionState::Playing);

    let mut recorder = ClientSession::connect(addr, ClientConfig::default(), Box::new(NullSink))
        .expect("recorder connect");
    recorder.setup().expect("recorder setup");
    recorder
        .record(
            Box::new(PatternSource::new(10)),
            Box::new(PassthroughCompressor),
        )
        .expect("record");
    assert_eq!(recorder.state(), SessionState::Recording);

    // Every captured frame must reach the viewer, in capture order.
    let mut received: Vec<Vec<u8>> = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while received.len() < 10 && Instant::now() < deadline {
        if let Ok(frame) = frames_rx.recv_timeout(Duration::from_millis(200)) {
            received.push(frame);
        }
    }
    assert_eq!(received.len(), 10, "viewer got {} of 10 frames", received.len());
    for (i, frame) in received.iter().enumerate() {
        assert_eq!(frame.len(), 2000, "frame {i} resized in transit");
        assert_eq!(frame[0], (i + 1) as u8, "frame {i} out of order");
    }

    let description = viewer.describe().expect("describe");
    assert!(description.contains("m=video"), "bad description: {description:?}");

    recorder.teardown().expect("recorder teardown");
    viewer.pause().expect("viewer pause");
    assert_eq!(viewer.state(), SessionState::Ready);
    viewer.teardown().expect("viewer teardown");
    assert_eq!(viewer.state(), SessionState::Init);

    server.stop();
}
