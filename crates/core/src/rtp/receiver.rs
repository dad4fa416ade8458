//! Receive endpoint: datagram poll loop, loss accounting, frame delivery.

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::media::{FrameSynchronizer, StatsSink, StreamStats};
use crate::rtp::SeqExtender;
use crate::runtime::TaskHandle;
use crate::transport::FragmentSocket;
use crate::wire::rtp::RtpPacket;

/// Largest reassembled payload the receive loop accepts.
const RECV_BUFFER_LEN: usize = 300_000;

/// How long one receive call blocks before re-checking for a stop signal.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Loss and volume accounting for one receive endpoint.
///
/// Shared between the receive loop (writer) and the feedback sender
/// (reader). Loss is counted against the next expected sequence number,
/// and the expectation resynchronizes to just past each accepted packet,
/// so one gap is charged once no matter how many packets follow it.
pub struct ReceiverStats {
    tracker: Mutex<SeqTracker>,
    total_bytes: AtomicU64,
}

struct SeqTracker {
    next_seq: Option<u16>,
    extender: SeqExtender,
    highest_ext: u64,
    cumulative_lost: u32,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self {
            tracker: Mutex::new(SeqTracker {
                next_seq: None,
                extender: SeqExtender::new(),
                highest_ext: 0,
                cumulative_lost: 0,
            }),
            total_bytes: AtomicU64::new(0),
        }
    }

    /// Accounts for one arrived packet.
    ///
    /// Returns the extended sequence number for packets at or ahead of the
    /// expectation, `None` for late or duplicated packets.
    pub fn record(&self, seq: u16, payload_len: usize) -> Option<u64> {
        self.total_bytes
            .fetch_add(payload_len as u64, Ordering::Relaxed);

        let mut tracker = self.tracker.lock();
        let loss = seq.wrapping_sub(tracker.next_seq.unwrap_or(seq));
        if loss >= 0x8000 {
            tracing::trace!(seq, "late packet");
            return None;
        }
        if loss > 0 {
            tracker.cumulative_lost = tracker.cumulative_lost.wrapping_add(u32::from(loss));
            tracing::debug!(seq, lost = loss, "sequence gap");
        }
        tracker.next_seq = Some(seq.wrapping_add(1));
        let ext = tracker.extender.extend(seq);
        if ext > tracker.highest_ext {
            tracker.highest_ext = ext;
        }
        Some(ext)
    }

    /// Highest extended sequence number seen, truncated to the 32-bit
    /// feedback wire field.
    pub fn highest_seq(&self) -> u32 {
        self.tracker.lock().highest_ext as u32
    }

    pub fn cumulative_lost(&self) -> u32 {
        self.tracker.lock().cumulative_lost
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Running loss ratio over the whole session.
    pub fn fraction_lost(&self) -> f64 {
        let tracker = self.tracker.lock();
        if tracker.highest_ext == 0 {
            return 0.0;
        }
        f64::from(tracker.cumulative_lost) / tracker.highest_ext as f64
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a receiver puts complete frames.
#[derive(Clone)]
pub enum Delivery {
    /// Buffer frames for a local consumer, pushing per-frame statistics
    /// to an optional sink. The playback path.
    Buffer {
        sync: Arc<FrameSynchronizer>,
        stats_sink: Option<Arc<Mutex<Box<dyn StatsSink>>>>,
    },
    /// Forward whole packets into a fan-out channel. The ingest path on
    /// a server relaying a recorded feed.
    Forward { frames: Sender<RtpPacket> },
}

/// Pulls media packets off a bound socket and delivers their frames.
pub struct RtpReceiver {
    socket: Arc<FragmentSocket>,
    stats: Arc<ReceiverStats>,
    delivery: Delivery,
    task: Option<TaskHandle>,
}

impl RtpReceiver {
    /// Binds the receive socket; its port is advertised to the sender in
    /// the setup exchange.
    pub fn bind(delivery: Delivery, stats: Arc<ReceiverStats>, config: &StreamConfig) -> Result<Self> {
        let socket = FragmentSocket::bind(config.mtu, config.reassembly_window)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self {
            socket: Arc::new(socket),
            stats,
            delivery,
            task: None,
        })
    }

    /// Port the sender should address media datagrams to.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Starts the poll loop. Idempotent; restartable after `stop`.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let socket = self.socket.clone();
        let stats = self.stats.clone();
        let delivery = self.delivery.clone();
        let play_started = Instant::now();
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        self.task = Some(TaskHandle::spawn_poll("rtp-receiver", move || {
            match socket.recv(&mut buf) {
                Ok((n, true)) => match RtpPacket::decode(&buf[..n]) {
                    Ok(packet) => deliver(&stats, &delivery, play_started, packet),
                    Err(error) => tracing::warn!(%error, "dropped undecodable packet"),
                },
                Ok((_, false)) => {}
                Err(StreamError::Io(error))
                    if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(error) => tracing::warn!(%error, "receive failed"),
            }
            true
        }));
    }

    /// Stops the poll loop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop();
        }
    }
}

fn deliver(
    stats: &Arc<ReceiverStats>,
    delivery: &Delivery,
    play_started: Instant,
    packet: RtpPacket,
) {
    let seq = packet.header.sequence_number;
    let Some(ext) = stats.record(seq, packet.payload.len()) else {
        return;
    };

    match delivery {
        Delivery::Buffer { sync, stats_sink } => {
            sync.add_frame(ext, packet.payload);
            if let Some(sink) = stats_sink {
                let total_bytes = stats.total_bytes();
                let play_time = play_started.elapsed().as_secs_f64();
                let data_rate = if play_time > 0.0 {
                    total_bytes as f64 / play_time
                } else {
                    0.0
                };
                sink.lock().update(StreamStats {
                    total_bytes,
                    fraction_lost: stats.fraction_lost(),
                    data_rate,
                });
            }
        }
        Delivery::Forward { frames } => {
            if frames.send(packet).is_err() {
                tracing::debug!("fan-out channel closed; frame dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_charged_once_after_resync() {
        let stats = ReceiverStats::new();
        for seq in [1u16, 2, 4, 5] {
            stats.record(seq, 10);
        }
        assert_eq!(stats.cumulative_lost(), 1);
        assert_eq!(stats.highest_seq(), 5);
        assert_eq!(stats.total_bytes(), 40);
    }

    #[test]
    fn wide_gap_counts_every_missing_seq() {
        let stats = ReceiverStats::new();
        stats.record(1, 1);
        stats.record(10, 1);
        assert_eq!(stats.cumulative_lost(), 8);
        assert_eq!(stats.highest_seq(), 10);
    }

    #[test]
    fn late_packet_changes_nothing() {
        let stats = ReceiverStats::new();
        stats.record(5, 1);
        stats.record(6, 1);
        assert_eq!(stats.record(2, 1), None);
        assert_eq!(stats.cumulative_lost(), 0);
        assert_eq!(stats.highest_seq(), 6);
    }

    #[test]
    fn duplicate_counts_as_loss_of_nothing() {
        let stats = ReceiverStats::new();
        stats.record(7, 1);
        // Expectation moved to 8; a second 7 is behind it.
        assert_eq!(stats.record(7, 1), None);
        assert_eq!(stats.cumulative_lost(), 0);
    }

    #[test]
    fn loss_across_wrap() {
        let stats = ReceiverStats::new();
        stats.record(65_534, 1);
        stats.record(65_535, 1);
        stats.record(1, 1); // packet 0 lost across the wrap
        assert_eq!(stats.cumulative_lost(), 1);
        assert_eq!(stats.highest_seq(), 65_536 + 1);
    }

    #[test]
    fn fraction_lost_is_float() {
        let stats = ReceiverStats::new();
        stats.record(1, 1);
        stats.record(4, 1);
        assert!((stats.fraction_lost() - 0.5).abs() < 1e-9);
    }
}
