//! Fragmenting UDP socket with receive-side reassembly.
//!
//! [`split_frames`] and [`Reassembler`] are the socket-free halves:
//! splitting draws a contiguous block of sequence numbers from a shared
//! counter, reassembly collects a group's members and joins them in
//! group-declared order. [`FragmentSocket`] binds them to a real socket.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
use crate::wire::fragment::{FragmentHeader, FragmentPacket};

/// Largest datagram the receive path accepts off the wire.
const MAX_DATAGRAM: usize = 65_535;

/// Splits `payload` into fragment packets no larger than `mtu`, drawing
/// sequence numbers from `next_seq`.
///
/// A payload that fits in one fragment gets an empty group and consumes a
/// single sequence number. Larger payloads consume one number per fragment,
/// and every member carries the full group list so the receiver can join
/// them in order no matter which member arrives last.
pub fn split_frames(payload: &[u8], mtu: usize, next_seq: &mut u16) -> Vec<FragmentPacket> {
    if payload.len() <= mtu {
        let seq = *next_seq;
        *next_seq = next_seq.wrapping_add(1);
        return vec![FragmentPacket::new(
            FragmentHeader::new(seq, Vec::new()),
            payload.to_vec(),
        )];
    }

    let count = payload.len().div_ceil(mtu);
    let group: Vec<u16> = (0..count)
        .map(|i| next_seq.wrapping_add(i as u16))
        .collect();
    *next_seq = next_seq.wrapping_add(count as u16);

    payload
        .chunks(mtu)
        .zip(&group)
        .map(|(chunk, &seq)| {
            FragmentPacket::new(FragmentHeader::new(seq, group.clone()), chunk.to_vec())
        })
        .collect()
}

/// Collects fragment groups until every member has arrived.
///
/// Incomplete groups do not linger forever: whenever a fragment arrives,
/// pending entries more than `window` sequence numbers behind it are
/// evicted, so a single lost member costs one payload rather than
/// unbounded memory.
pub struct Reassembler {
    pending: HashMap<u16, Vec<u8>>,
    window: u16,
}

impl Reassembler {
    pub fn new(window: u16) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    /// Accepts one fragment. Returns the joined payload once the whole
    /// group is present, `None` while members are still missing.
    pub fn accept(&mut self, packet: FragmentPacket) -> Option<Vec<u8>> {
        if packet.is_complete() {
            return Some(packet.payload);
        }

        let seq = packet.header.seq;
        let group = packet.header.group;
        self.pending.insert(seq, packet.payload);
        self.evict_older_than(seq);

        if !group.iter().all(|member| self.pending.contains_key(member)) {
            return None;
        }

        let mut frame = Vec::new();
        for member in &group {
            if let Some(part) = self.pending.remove(member) {
                frame.extend_from_slice(&part);
            }
        }
        Some(frame)
    }

    /// Number of fragments waiting on the rest of their group.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn evict_older_than(&mut self, newest: u16) {
        let window = self.window;
        let before = self.pending.len();
        // Wrapping distance: entries "behind" the newest fragment by more
        // than the window are stale; entries ahead (distance >= 0x8000
        // after wrapping) are recent wrap-around traffic and stay.
        self.pending.retain(|&seq, _| {
            let behind = newest.wrapping_sub(seq);
            behind <= window || behind >= 0x8000
        });
        let evicted = before - self.pending.len();
        if evicted > 0 {
            tracing::debug!(evicted, newest, "evicted stale fragments");
        }
    }
}

/// UDP socket that fragments on send and reassembles on receive.
///
/// One socket is read by exactly one task; sends may come from several,
/// so the outbound counter sits behind a mutex and each sender draws a
/// contiguous block of sequence numbers.
pub struct FragmentSocket {
    socket: UdpSocket,
    mtu: usize,
    next_seq: Mutex<u16>,
    recv_state: Mutex<RecvState>,
}

struct RecvState {
    reassembler: Reassembler,
    scratch: Box<[u8]>,
}

impl FragmentSocket {
    /// Binds an ephemeral socket and connects it to `peer` for sending.
    pub fn connect(peer: SocketAddr, mtu: usize, window: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(peer)?;
        Ok(Self::wrap(socket, mtu, window))
    }

    /// Binds an ephemeral receive socket; its port is advertised to the
    /// peer during setup.
    pub fn bind(mtu: usize, window: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self::wrap(socket, mtu, window))
    }

    fn wrap(socket: UdpSocket, mtu: usize, window: u16) -> Self {
        Self {
            socket,
            mtu,
            next_seq: Mutex::new(1),
            recv_state: Mutex::new(RecvState {
                reassembler: Reassembler::new(window),
                scratch: vec![0u8; MAX_DATAGRAM].into_boxed_slice(),
            }),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Bounds how long [`recv`](Self::recv) blocks waiting for a datagram.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// Sends one payload, splitting it into fragments as needed.
    ///
    /// Returns the number of payload bytes written (headers excluded). A
    /// failure partway through a group stops the send and reports the bytes
    /// that did go out via [`StreamError::PartialSend`].
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        let packets = {
            let mut next_seq = self.next_seq.lock();
            split_frames(payload, self.mtu, &mut next_seq)
        };

        let mut written = 0usize;
        for packet in &packets {
            match self.socket.send(&packet.encode()) {
                Ok(_) => written += packet.payload.len(),
                Err(source) if written == 0 => return Err(source.into()),
                Err(source) => return Err(StreamError::PartialSend { written, source }),
            }
        }
        Ok(written)
    }

    /// Receives one datagram.
    ///
    /// Returns `(len, true)` with the payload copied into `buf` when a
    /// complete payload is available, or `(fragment_len, false)` when the
    /// datagram was a group member whose siblings are still outstanding.
    /// Socket timeouts and malformed datagrams surface as errors; the
    /// caller decides whether to retry or drop.
    pub fn recv(&self, buf: &mut [u8]) -> Result<(usize, bool)> {
        let mut state = self.recv_state.lock();
        let n = self.socket.recv(&mut state.scratch)?;
        let packet = FragmentPacket::decode(&state.scratch[..n])?;
        let fragment_len = packet.payload.len();

        match state.reassembler.accept(packet) {
            Some(frame) => {
                let len = frame.len().min(buf.len());
                if len < frame.len() {
                    tracing::warn!(
                        frame_len = frame.len(),
                        capacity = buf.len(),
                        "payload truncated to destination buffer"
                    );
                }
                buf[..len].copy_from_slice(&frame[..len]);
                Ok((len, true))
            }
            None => Ok((fragment_len, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_is_single_fragment() {
        let mut seq = 1u16;
        let packets = split_frames(&[1, 2, 3], 10, &mut seq);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_complete());
        assert_eq!(packets[0].header.seq, 1);
        assert_eq!(seq, 2);
    }

    #[test]
    fn split_respects_mtu_and_numbers_contiguously() {
        let payload: Vec<u8> = (0..10).collect();
        let mut seq = 5u16;
        let packets = split_frames(&payload, 4, &mut seq);
        assert_eq!(packets.len(), 3);
        assert_eq!(seq, 8);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.header.seq, 5 + i as u16);
            assert_eq!(packet.header.group, vec![5, 6, 7]);
        }
        assert_eq!(packets[0].payload, vec![0, 1, 2, 3]);
        assert_eq!(packets[2].payload, vec![8, 9]);
    }

    #[test]
    fn counter_wraps() {
        let mut seq = u16::MAX;
        let packets = split_frames(&[0u8; 8], 4, &mut seq);
        assert_eq!(packets[0].header.group, vec![u16::MAX, 0]);
        assert_eq!(seq, 1);
    }

    #[test]
    fn reassembly_is_order_independent() {
        let payload: Vec<u8> = (0..25).collect();
        let mut seq = 1u16;
        let mut packets = split_frames(&payload, 10, &mut seq);
        packets.reverse();

        let mut reassembler = Reassembler::new(256);
        assert_eq!(reassembler.accept(packets[0].clone()), None);
        assert_eq!(reassembler.accept(packets[1].clone()), None);
        let frame = reassembler.accept(packets[2].clone()).unwrap();
        assert_eq!(frame, payload);
        assert_eq!(reassembler.pending_len(), 0);
    }

    #[test]
    fn interleaved_groups_both_complete() {
        let first: Vec<u8> = vec![1; 12];
        let second: Vec<u8> = vec![2; 12];
        let mut seq = 1u16;
        let a = split_frames(&first, 6, &mut seq);
        let b = split_frames(&second, 6, &mut seq);

        let mut reassembler = Reassembler::new(256);
        assert_eq!(reassembler.accept(a[0].clone()), None);
        assert_eq!(reassembler.accept(b[0].clone()), None);
        assert_eq!(reassembler.accept(b[1].clone()), Some(second));
        assert_eq!(reassembler.accept(a[1].clone()), Some(first));
    }

    #[test]
    fn single_fragment_bypasses_pending() {
        let mut reassembler = Reassembler::new(256);
        let packet = FragmentPacket::new(FragmentHeader::new(9, Vec::new()), vec![7, 8]);
        assert_eq!(reassembler.accept(packet), Some(vec![7, 8]));
        assert_eq!(reassembler.pending_len(), 0);
    }

    #[test]
    fn stale_fragments_evicted_past_window() {
        let mut reassembler = Reassembler::new(8);
        // Lone member of a group that will never complete.
        let orphan = FragmentPacket::new(FragmentHeader::new(1, vec![1, 2]), vec![0]);
        assert_eq!(reassembler.accept(orphan), None);
        assert_eq!(reassembler.pending_len(), 1);

        // A fragment window+1 ahead pushes the orphan out.
        let newer = FragmentPacket::new(FragmentHeader::new(10, vec![10, 11]), vec![0]);
        assert_eq!(reassembler.accept(newer), None);
        assert_eq!(reassembler.pending_len(), 1);

        // The evicted member arriving late cannot complete its group.
        let sibling = FragmentPacket::new(FragmentHeader::new(2, vec![1, 2]), vec![0]);
        assert_eq!(reassembler.accept(sibling), None);
    }

    #[test]
    fn duplicate_fragment_overwrites() {
        let mut seq = 1u16;
        let packets = split_frames(&(0..20).collect::<Vec<u8>>(), 10, &mut seq);
        let mut reassembler = Reassembler::new(256);
        assert_eq!(reassembler.accept(packets[0].clone()), None);
        assert_eq!(reassembler.accept(packets[0].clone()), None);
        assert!(reassembler.accept(packets[1].clone()).is_some());
    }

    #[test]
    fn socket_round_trip_with_fragmentation() {
        let receiver = FragmentSocket::bind(1000, 256).unwrap();
        let peer = receiver.local_addr().unwrap();
        let sender = FragmentSocket::connect(peer, 1000, 256).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let payload: Vec<u8> = (0..5000u32).map(|v| v as u8).collect();
        let written = sender.send(&payload).unwrap();
        assert_eq!(written, payload.len());

        let mut buf = vec![0u8; 10_000];
        loop {
            let (n, complete) = receiver.recv(&mut buf).unwrap();
            if complete {
                assert_eq!(&buf[..n], &payload[..]);
                break;
            }
        }
    }
}
