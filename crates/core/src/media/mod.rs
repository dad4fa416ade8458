//! Frame-level collaborators and the receive-side synchronizer.
//!
//! The stack moves opaque encoded frames; capture, encoding and display
//! live outside it. This module defines the seams those externals plug
//! into:
//!
//! - [`FrameSource`] — where outgoing frames come from (a camera pump,
//!   a file reader, or a [`SyncSource`] draining a synchronizer).
//! - [`FrameCompressor`] — re-encodes a frame at a reduced quality when
//!   the congestion controller asks for it.
//! - [`FrameSink`] — where received frames go (a display, a file).
//! - [`StatsSink`] — receives per-frame delivery statistics.
//!
//! [`FrameSynchronizer`] (in [`sync`]) is the reorder buffer between the
//! network receive path and a frame consumer.
//!
//! [`SyncSource`]: sync::SyncSource
//! [`FrameSynchronizer`]: sync::FrameSynchronizer

pub mod sync;

pub use sync::{FrameSynchronizer, SyncSource};

use crate::error::Result;

/// Result of asking a [`FrameSource`] for its next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePull {
    /// A complete encoded frame.
    Frame(Vec<u8>),
    /// Nothing available right now; ask again next tick.
    Pending,
    /// The stream has ended; the sender should stop itself.
    Exhausted,
}

/// Supplies outgoing frames to a sender, one per pacing tick.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> FramePull;
}

/// Re-encodes a frame at the requested quality (0–100 scale).
///
/// Called on the send path when congestion calls for smaller frames.
/// An error leaves the original frame in place, so a flaky encoder
/// degrades quality adaptation rather than the stream.
pub trait FrameCompressor: Send {
    fn compress(&mut self, frame: &[u8], quality: u8) -> Result<Vec<u8>>;
}

/// Compressor that hands frames back untouched.
///
/// The default when no re-encoder is plugged in; congestion adaptation
/// then falls back to pacing alone.
pub struct PassthroughCompressor;

impl FrameCompressor for PassthroughCompressor {
    fn compress(&mut self, frame: &[u8], _quality: u8) -> Result<Vec<u8>> {
        Ok(frame.to_vec())
    }
}

/// Consumes frames on the receiving end, typically a display.
pub trait FrameSink: Send {
    fn show_frame(&mut self, frame: &[u8]);
}

/// Per-frame delivery statistics pushed to a [`StatsSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamStats {
    /// Payload bytes delivered since playback started.
    pub total_bytes: u64,
    /// Running loss ratio: cumulative lost over highest sequence seen.
    pub fraction_lost: f64,
    /// Delivered payload bytes per second of play time.
    pub data_rate: f64,
}

/// Receives delivery statistics as frames arrive.
pub trait StatsSink: Send {
    fn update(&mut self, stats: StreamStats);
}
