//! Media send and receive endpoints.
//!
//! [`RtpSender`] paces frames out of a [`FrameSource`]; [`RtpReceiver`]
//! pulls packets off a [`FragmentSocket`] and hands frames to a
//! synchronizer or a fan-out channel. Both run as [`runtime`] workers and
//! survive pause/resume cycles.
//!
//! [`FrameSource`]: crate::media::FrameSource
//! [`FragmentSocket`]: crate::transport::FragmentSocket
//! [`runtime`]: crate::runtime

pub mod receiver;
pub mod sender;

pub use receiver::{Delivery, ReceiverStats, RtpReceiver};
pub use sender::RtpSender;

/// Extends wrapping 16-bit wire sequence numbers into a monotonic 64-bit
/// space, so reorder buffers can key frames across wrap-arounds.
pub(crate) struct SeqExtender {
    cycles: u64,
    last: Option<u16>,
}

impl SeqExtender {
    pub(crate) fn new() -> Self {
        Self {
            cycles: 0,
            last: None,
        }
    }

    /// Maps a wire sequence number into the extended space.
    ///
    /// A jump backwards of less than half the sequence space is a
    /// wrap-around and opens a new cycle; a jump forwards of more than
    /// half the space is a stale pre-wrap packet and maps into the
    /// previous cycle.
    pub(crate) fn extend(&mut self, seq: u16) -> u64 {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return u64::from(seq);
        };
        let ahead = seq.wrapping_sub(last);
        if ahead < 0x8000 {
            if seq < last {
                self.cycles += 1;
            }
            self.last = Some(seq);
            (self.cycles << 16) | u64::from(seq)
        } else {
            let cycle = if seq > last {
                self.cycles.saturating_sub(1)
            } else {
                self.cycles
            };
            (cycle << 16) | u64::from(seq)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_without_wrap() {
        let mut ext = SeqExtender::new();
        assert_eq!(ext.extend(1), 1);
        assert_eq!(ext.extend(2), 2);
        assert_eq!(ext.extend(5), 5);
    }

    #[test]
    fn wrap_opens_new_cycle() {
        let mut ext = SeqExtender::new();
        assert_eq!(ext.extend(65_534), 65_534);
        assert_eq!(ext.extend(65_535), 65_535);
        assert_eq!(ext.extend(0), 65_536);
        assert_eq!(ext.extend(1), 65_537);
    }

    #[test]
    fn stale_pre_wrap_packet_maps_into_previous_cycle() {
        let mut ext = SeqExtender::new();
        ext.extend(65_535);
        assert_eq!(ext.extend(2), 65_536 + 2);
        // Straggler from before the wrap.
        assert_eq!(ext.extend(65_533), 65_533);
        // Cursor did not move backwards.
        assert_eq!(ext.extend(3), 65_536 + 3);
    }

    #[test]
    fn duplicate_keeps_position() {
        let mut ext = SeqExtender::new();
        ext.extend(10);
        assert_eq!(ext.extend(10), 10);
        assert_eq!(ext.extend(11), 11);
    }
}
