//! Receive-side frame reorder buffer.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::media::{FramePull, FrameSource};

/// Reorder buffer between the network receive path and a frame consumer.
///
/// Frames arrive keyed by sequence number in whatever order the network
/// delivers them; consumers take them back in ascending order. A cursor
/// tracks the next acceptable sequence number: frames behind it are
/// already consumed (or duplicates) and are dropped on arrival, and
/// consuming a frame advances the cursor past it, skipping any gap the
/// network never filled.
///
/// Shared between a producer task and a consumer task; all methods take
/// `&self`.
pub struct FrameSynchronizer {
    state: Mutex<SyncState>,
    available: Condvar,
}

struct SyncState {
    frames: BTreeMap<u64, Vec<u8>>,
    cursor: u64,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncState {
                frames: BTreeMap::new(),
                cursor: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Buffers a frame under its sequence number.
    ///
    /// Frames behind the cursor and duplicates of buffered frames are
    /// dropped. Wakes one blocked [`next_frame`](Self::next_frame) caller.
    pub fn add_frame(&self, seq: u64, frame: Vec<u8>) {
        let mut state = self.state.lock();
        if seq < state.cursor {
            tracing::trace!(seq, cursor = state.cursor, "dropped late frame");
            return;
        }
        if state.frames.contains_key(&seq) {
            tracing::trace!(seq, "dropped duplicate frame");
            return;
        }
        state.frames.insert(seq, frame);
        self.available.notify_one();
    }

    /// Takes the oldest buffered frame, blocking until one is available.
    ///
    /// Returns the smallest buffered sequence number's frame and advances
    /// the cursor to just past it.
    pub fn next_frame(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        loop {
            if let Some((seq, frame)) = state.frames.pop_first() {
                state.cursor = seq + 1;
                return frame;
            }
            self.available.wait(&mut state);
        }
    }

    /// Non-blocking variant of [`next_frame`](Self::next_frame).
    pub fn try_next_frame(&self) -> Option<(u64, Vec<u8>)> {
        let mut state = self.state.lock();
        let (seq, frame) = state.frames.pop_first()?;
        state.cursor = seq + 1;
        Some((seq, frame))
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    /// Next sequence number the buffer will accept.
    pub fn cursor(&self) -> u64 {
        self.state.lock().cursor
    }
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a [`FrameSynchronizer`] into a [`FrameSource`] for a sender
/// that relays buffered frames.
///
/// An empty buffered frame marks end of stream and is reported as
/// [`FramePull::Exhausted`].
pub struct SyncSource {
    sync: Arc<FrameSynchronizer>,
}

impl SyncSource {
    pub fn new(sync: Arc<FrameSynchronizer>) -> Self {
        Self { sync }
    }
}

impl FrameSource for SyncSource {
    fn next_frame(&mut self) -> FramePull {
        match self.sync.try_next_frame() {
            None => FramePull::Pending,
            Some((_, frame)) if frame.is_empty() => FramePull::Exhausted,
            Some((_, frame)) => FramePull::Frame(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn out_of_order_arrivals_consumed_in_order() {
        let sync = FrameSynchronizer::new();
        sync.add_frame(3, vec![3]);
        sync.add_frame(1, vec![1]);
        sync.add_frame(2, vec![2]);
        assert_eq!(sync.next_frame(), vec![1]);
        assert_eq!(sync.next_frame(), vec![2]);
        assert_eq!(sync.next_frame(), vec![3]);
        assert_eq!(sync.cursor(), 4);
    }

    #[test]
    fn gap_is_skipped() {
        let sync = FrameSynchronizer::new();
        sync.add_frame(1, vec![1]);
        assert_eq!(sync.next_frame(), vec![1]);
        sync.add_frame(4, vec![4]);
        assert_eq!(sync.next_frame(), vec![4]);
        assert_eq!(sync.cursor(), 5);
    }

    #[test]
    fn late_frame_dropped() {
        let sync = FrameSynchronizer::new();
        sync.add_frame(1, vec![1]);
        sync.add_frame(2, vec![2]);
        assert_eq!(sync.next_frame(), vec![1]);
        assert_eq!(sync.next_frame(), vec![2]);
        sync.add_frame(2, vec![0xFF]);
        assert!(sync.is_empty());
    }

    #[test]
    fn duplicate_of_buffered_frame_dropped() {
        let sync = FrameSynchronizer::new();
        sync.add_frame(5, vec![5]);
        sync.add_frame(5, vec![0xFF]);
        assert_eq!(sync.next_frame(), vec![5]);
        assert!(sync.is_empty());
    }

    #[test]
    fn try_next_frame_does_not_block() {
        let sync = FrameSynchronizer::new();
        assert_eq!(sync.try_next_frame(), None);
        sync.add_frame(1, vec![1]);
        assert_eq!(sync.try_next_frame(), Some((1, vec![1])));
    }

    #[test]
    fn next_frame_wakes_on_arrival() {
        let sync = Arc::new(FrameSynchronizer::new());
        let consumer = {
            let sync = sync.clone();
            thread::spawn(move || sync.next_frame())
        };
        thread::sleep(Duration::from_millis(20));
        sync.add_frame(1, vec![42]);
        assert_eq!(consumer.join().unwrap(), vec![42]);
    }

    #[test]
    fn sync_source_maps_states() {
        let sync = Arc::new(FrameSynchronizer::new());
        let mut source = SyncSource::new(sync.clone());
        assert_eq!(source.next_frame(), FramePull::Pending);
        sync.add_frame(1, vec![1, 2]);
        assert_eq!(source.next_frame(), FramePull::Frame(vec![1, 2]));
        sync.add_frame(2, Vec::new());
        assert_eq!(source.next_frame(), FramePull::Exhausted);
    }
}
