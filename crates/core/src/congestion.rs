//! Congestion classification and send-side adaptation.
//!
//! Receivers report a loss fraction; [`CongestionLevel`] buckets it into
//! five severities. The [`CongestionController`] periodically compares the
//! current level against the last one it acted on and, on change, re-paces
//! the sender by replacing its ticker interval. Independently, the send
//! path calls [`CongestionController::adjust_frame`] on every outgoing
//! frame to re-compress it at a reduced quality while congested.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::media::FrameCompressor;
use crate::runtime::TaskHandle;

/// Compression quality used when the link is uncongested.
pub const BASE_QUALITY: u8 = 75;

/// Loss severity, derived from the reported loss fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CongestionLevel {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl CongestionLevel {
    /// Buckets a loss fraction. Anything that is not clearly in a lower
    /// bucket (including out-of-range junk) is treated as severe.
    pub fn from_fraction_lost(fraction: f64) -> Self {
        if (0.0..=0.01).contains(&fraction) {
            Self::None
        } else if fraction <= 0.25 {
            Self::Low
        } else if fraction <= 0.5 {
            Self::Medium
        } else if fraction <= 0.75 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    /// Severity as a 0–4 scale factor.
    pub fn ordinal(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::VeryHigh => 4,
        }
    }
}

/// Shared cell holding the most recently reported congestion level.
///
/// Written by the feedback receive path, read by the controller and the
/// send path.
pub struct CongestionMonitor {
    level: Mutex<CongestionLevel>,
}

impl CongestionMonitor {
    pub fn new() -> Self {
        Self {
            level: Mutex::new(CongestionLevel::None),
        }
    }

    /// Classifies a reported loss fraction and stores the level.
    pub fn observe(&self, fraction_lost: f64) {
        let level = CongestionLevel::from_fraction_lost(fraction_lost);
        let mut current = self.level.lock();
        if *current != level {
            tracing::debug!(?level, fraction_lost, "congestion level changed");
        }
        *current = level;
    }

    pub fn level(&self) -> CongestionLevel {
        *self.level.lock()
    }
}

impl Default for CongestionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Pacing interval for a congestion level: the base period stretched by
/// one tenth (integer milliseconds) per severity step.
pub fn paced_interval(base: Duration, level: CongestionLevel) -> Duration {
    let base_ms = base.as_millis() as u64;
    Duration::from_millis(base_ms + u64::from(level.ordinal()) * (base_ms / 10))
}

/// Compression quality for a congestion level: 15% of the base quality
/// shaved off per severity step.
pub fn reduced_quality(level: CongestionLevel) -> u8 {
    let cut = (f64::from(BASE_QUALITY) * 0.15 * f64::from(level.ordinal())) as u8;
    BASE_QUALITY - cut
}

/// Adapts a sender to the congestion level reported by its receiver.
///
/// Owns the frame compressor; shared between the session (which starts and
/// stops it) and the sender's pacing task (which calls
/// [`adjust_frame`](Self::adjust_frame) inline).
pub struct CongestionController {
    monitor: Arc<CongestionMonitor>,
    compressor: Arc<Mutex<Box<dyn FrameCompressor>>>,
    frame_period: Duration,
    interval: Duration,
    task: Mutex<Option<TaskHandle>>,
}

impl CongestionController {
    pub fn new(
        monitor: Arc<CongestionMonitor>,
        compressor: Arc<Mutex<Box<dyn FrameCompressor>>>,
        frame_period: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            monitor,
            compressor,
            frame_period,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Starts the periodic pace check, pushing replacement intervals into
    /// `pace` whenever the congestion level changes. Idempotent.
    pub fn start(&self, pace: Sender<Duration>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let monitor = self.monitor.clone();
        let frame_period = self.frame_period;
        let mut acted_on = CongestionLevel::None;
        *task = Some(TaskHandle::spawn_periodic(
            "congestion",
            self.interval,
            move || {
                let level = monitor.level();
                if level != acted_on {
                    let interval = paced_interval(frame_period, level);
                    tracing::info!(?level, ?interval, "re-pacing sender");
                    let _ = pace.send(interval);
                    acted_on = level;
                }
                true
            },
        ));
    }

    /// Stops the pace check. Idempotent.
    pub fn stop(&self) {
        if let Some(mut task) = self.task.lock().take() {
            task.stop();
        }
    }

    /// Re-compresses `frame` at a reduced quality when congested.
    ///
    /// Uncongested frames pass through untouched. A compressor error is
    /// logged and the original frame is sent as-is.
    pub fn adjust_frame(&self, frame: &mut Vec<u8>) {
        let level = self.monitor.level();
        if level == CongestionLevel::None {
            return;
        }
        let quality = reduced_quality(level);
        match self.compressor.lock().compress(frame, quality) {
            Ok(reduced) => {
                tracing::debug!(
                    quality,
                    original_len = frame.len(),
                    reduced_len = reduced.len(),
                    "frame re-compressed"
                );
                *frame = reduced;
            }
            Err(error) => {
                tracing::warn!(%error, quality, "compressor failed; sending original frame");
            }
        }
    }
}
