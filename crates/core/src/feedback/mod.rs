//! Loss feedback loop.
//!
//! The receiving endpoint of a media stream runs a [`FeedbackSender`]
//! that periodically reports loss deltas back over a dedicated UDP
//! socket; the sending endpoint runs a [`FeedbackReceiver`] that polls
//! for those reports and feeds the congestion monitor. The feedback
//! socket's port travels in the setup exchange, in the opposite
//! direction from the media port.

pub mod receiver;
pub mod sender;

pub use receiver::FeedbackReceiver;
pub use sender::FeedbackSender;
