//! Network transport for media datagrams.
//!
//! Control signaling runs over plain TCP and is handled by the session
//! layer; this module owns the UDP side. [`FragmentSocket`] wraps a UDP
//! socket with the fragment framing from [`wire::fragment`], so callers
//! send and receive whole payloads regardless of datagram size limits.
//!
//! [`wire::fragment`]: crate::wire::fragment

pub mod fragment;

pub use fragment::{FragmentSocket, Reassembler, split_frames};
