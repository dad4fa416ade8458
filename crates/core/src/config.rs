//! Tunable parameters for the media plane and the two endpoint roles.

use std::time::Duration;

/// Media-plane knobs shared by both endpoint roles.
///
/// Defaults reproduce the stack's reference deployment: MJPEG frames at
/// ~30 fps over 64 KB fragments, feedback every 5 s, congestion reaction
/// every 400 ms.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Largest fragment payload handed to a single datagram send.
    /// Frames larger than this are split into a fragment group.
    pub mtu: usize,
    /// Payload type tag stamped on every media packet (26 = motion JPEG).
    pub payload_type: u8,
    /// Base pacing interval between outgoing frames. Also the timestamp
    /// unit: frame `n` carries timestamp `n * frame_period` (in ms).
    pub frame_period: Duration,
    /// How often the congestion controller re-evaluates the send pace.
    pub congestion_interval: Duration,
    /// How often a receiving endpoint reports loss back to its sender.
    pub feedback_interval: Duration,
    /// How often a sending endpoint polls its feedback socket.
    pub feedback_poll: Duration,
    /// Sliding reassembly window, in fragment sequence numbers. Incomplete
    /// fragment groups older than this are evicted.
    pub reassembly_window: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mtu: 64_000,
            payload_type: 26,
            frame_period: Duration::from_millis(33),
            congestion_interval: Duration::from_millis(400),
            feedback_interval: Duration::from_secs(5),
            feedback_poll: Duration::from_millis(400),
            reassembly_window: 256,
        }
    }
}

/// Configuration for [`StreamServer`](crate::StreamServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address the control listener binds to, e.g. `"0.0.0.0:9000"`.
    pub bind_addr: String,
    /// Capacity of each playing session's private frame channel. When a
    /// slow session falls this many frames behind the live feed, further
    /// frames for it are dropped rather than stalling other sessions.
    pub session_channel_capacity: usize,
    /// Media-plane parameters applied to every session.
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            session_channel_capacity: 32,
            stream: StreamConfig::default(),
        }
    }
}

/// Configuration for [`ClientSession`](crate::ClientSession).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Resource name placed in every request line, e.g. a stream id.
    pub resource: String,
    /// How often the display pump hands a buffered frame to the sink.
    pub display_interval: Duration,
    /// Media-plane parameters for this session.
    pub stream: StreamConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resource: "stream".to_string(),
            display_interval: Duration::from_millis(33),
            stream: StreamConfig::default(),
        }
    }
}
