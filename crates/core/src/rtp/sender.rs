//! Send endpoint: paced frame pull, adaptation, packetize, send.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::config::StreamConfig;
use crate::congestion::CongestionController;
use crate::error::Result;
use crate::media::{FramePull, FrameSource};
use crate::runtime::{TaskHandle, pace_channel};
use crate::transport::FragmentSocket;
use crate::wire::rtp::{RtpHeader, RtpPacket};

/// Paces frames from a [`FrameSource`] to one peer.
///
/// Each tick pulls at most one frame, offers it to the congestion
/// controller for quality adjustment, stamps it with the frame counter
/// (sequence number and timestamp both derive from it) and sends it
/// through the fragmenting socket. The tick interval starts at the
/// configured frame period and is re-paced by the controller through
/// [`pace_handle`](Self::pace_handle).
///
/// The frame counter and source survive pause/resume, so playback
/// continues where it stopped.
pub struct RtpSender {
    socket: Arc<FragmentSocket>,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    controller: Arc<CongestionController>,
    frame_counter: Arc<AtomicU64>,
    payload_type: u8,
    frame_period: Duration,
    pace_tx: Sender<Duration>,
    pace_rx: Receiver<Duration>,
    task: Option<TaskHandle>,
}

impl RtpSender {
    /// Connects the media socket to `peer` and prepares a stopped sender.
    pub fn connect(
        peer: SocketAddr,
        source: Box<dyn FrameSource>,
        controller: Arc<CongestionController>,
        config: &StreamConfig,
    ) -> Result<Self> {
        let socket = FragmentSocket::connect(peer, config.mtu, config.reassembly_window)?;
        let (pace_tx, pace_rx) = pace_channel();
        tracing::debug!(%peer, "media sender connected");
        Ok(Self {
            socket: Arc::new(socket),
            source: Arc::new(Mutex::new(source)),
            controller,
            frame_counter: Arc::new(AtomicU64::new(1)),
            payload_type: config.payload_type,
            frame_period: config.frame_period,
            pace_tx,
            pace_rx,
            task: None,
        })
    }

    /// Channel the congestion controller uses to replace the pacing
    /// interval while the sender runs.
    pub fn pace_handle(&self) -> Sender<Duration> {
        self.pace_tx.clone()
    }

    /// Starts pacing frames out. Idempotent; restartable after `stop`.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let socket = self.socket.clone();
        let source = self.source.clone();
        let controller = self.controller.clone();
        let counter = self.frame_counter.clone();
        let payload_type = self.payload_type;
        let period_ms = self.frame_period.as_millis() as u64;

        self.task = Some(TaskHandle::spawn_paced(
            "rtp-sender",
            self.frame_period,
            self.pace_rx.clone(),
            move || {
                let pull = source.lock().next_frame();
                let mut frame = match pull {
                    FramePull::Pending => return true,
                    FramePull::Exhausted => {
                        tracing::info!("frame source exhausted; sender stopping");
                        return false;
                    }
                    FramePull::Frame(frame) if frame.is_empty() => {
                        tracing::info!("empty frame marks end of stream; sender stopping");
                        return false;
                    }
                    FramePull::Frame(frame) => frame,
                };

                controller.adjust_frame(&mut frame);
                let n = counter.fetch_add(1, Ordering::Relaxed);
                let header =
                    RtpHeader::new(payload_type, n as u16, n.wrapping_mul(period_ms) as u32);
                let packet = RtpPacket::new(header, frame);
                match socket.send(&packet.encode()) {
                    Ok(bytes) => tracing::debug!(frame_no = n, bytes, "sent frame"),
                    Err(error) => tracing::warn!(%error, frame_no = n, "frame send failed"),
                }
                true
            },
        ));
    }

    /// Stops pacing. Synchronous: no frame goes out after this returns.
    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop();
        }
    }
}
