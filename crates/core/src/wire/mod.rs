//! Binary layouts for the three datagram formats.
//!
//! Media packets ([`rtp`]) travel inside fragment frames ([`fragment`]);
//! feedback packets ([`rtcp`]) are small enough to go as bare datagrams.
//! Each module owns the encode/decode pair for its format. Multi-byte
//! header fields are big-endian; the fragment layer and the feedback body
//! are little-endian (see the field docs).

pub mod fragment;
pub mod rtcp;
pub mod rtp;

pub use fragment::{FragmentHeader, FragmentPacket};
pub use rtcp::{FeedbackPacket, RtcpHeader};
pub use rtp::{RtpHeader, RtpPacket};
