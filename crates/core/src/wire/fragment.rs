//! Fragment framing for oversized datagrams.
//!
//! Payloads larger than the configured MTU are split into a *group* of
//! fragments. Each fragment frame is:
//!
//! ```text
//! [ header_len: u16 ][ seq: u16 ][ group_count: u16 ][ group_count x u16 ][ payload ]
//! ```
//!
//! All fields are little-endian. `header_len` counts the bytes between the
//! length prefix and the payload, so it is always `4 + 2 * group_count`.
//! Every member of a group carries the full group list; a fragment with an
//! empty group is a complete payload on its own and skips reassembly.

use crate::error::{ParseErrorKind, Result, StreamError};

/// Bytes of fragment header before the group list (seq + group count).
pub const FRAGMENT_FIXED_LEN: usize = 4;

/// Bytes of the `header_len` prefix itself.
pub const FRAGMENT_PREFIX_LEN: usize = 2;

fn parse_error(kind: ParseErrorKind) -> StreamError {
    StreamError::Parse { kind }
}

/// Fragment sequencing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    /// This fragment's own sequence number.
    pub seq: u16,
    /// Sequence numbers of every fragment in the group, in payload order.
    /// Empty for a self-contained fragment.
    pub group: Vec<u16>,
}

impl FragmentHeader {
    pub fn new(seq: u16, group: Vec<u16>) -> Self {
        Self { seq, group }
    }

    /// Encoded size, excluding the length prefix.
    pub fn wire_len(&self) -> usize {
        FRAGMENT_FIXED_LEN + 2 * self.group.len()
    }

    /// Appends the encoded header (without length prefix) to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&(self.group.len() as u16).to_le_bytes());
        for member in &self.group {
            buf.extend_from_slice(&member.to_le_bytes());
        }
    }

    /// Parses a header from exactly the `header_len` bytes after the prefix.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAGMENT_FIXED_LEN {
            return Err(parse_error(ParseErrorKind::ShortFragmentHeader));
        }
        let seq = u16::from_le_bytes([buf[0], buf[1]]);
        let count = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        if buf.len() != FRAGMENT_FIXED_LEN + 2 * count {
            return Err(parse_error(ParseErrorKind::FragmentLengthMismatch));
        }
        let group = (0..count)
            .map(|i| {
                let at = FRAGMENT_FIXED_LEN + 2 * i;
                u16::from_le_bytes([buf[at], buf[at + 1]])
            })
            .collect();
        Ok(Self { seq, group })
    }
}

/// One fragment frame: header plus its slice of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPacket {
    pub header: FragmentHeader,
    pub payload: Vec<u8>,
}

impl FragmentPacket {
    pub fn new(header: FragmentHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// True when this fragment is a complete payload on its own.
    pub fn is_complete(&self) -> bool {
        self.header.group.is_empty()
    }

    /// Serializes length prefix, header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let header_len = self.header.wire_len();
        let mut buf = Vec::with_capacity(FRAGMENT_PREFIX_LEN + header_len + self.payload.len());
        buf.extend_from_slice(&(header_len as u16).to_le_bytes());
        self.header.encode_into(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses one datagram into header and payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAGMENT_PREFIX_LEN {
            return Err(parse_error(ParseErrorKind::ShortFragmentHeader));
        }
        let header_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let payload_at = FRAGMENT_PREFIX_LEN + header_len;
        if buf.len() < payload_at {
            return Err(parse_error(ParseErrorKind::FragmentLengthMismatch));
        }
        let header = FragmentHeader::decode(&buf[FRAGMENT_PREFIX_LEN..payload_at])?;
        Ok(Self {
            header,
            payload: buf[payload_at..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fragment_round_trips() {
        let packet = FragmentPacket::new(FragmentHeader::new(7, Vec::new()), vec![1, 2, 3]);
        assert!(packet.is_complete());
        let decoded = FragmentPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn grouped_fragment_round_trips() {
        let packet = FragmentPacket::new(FragmentHeader::new(11, vec![10, 11, 12]), vec![9; 40]);
        assert!(!packet.is_complete());
        let decoded = FragmentPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.header.seq, 11);
        assert_eq!(decoded.header.group, vec![10, 11, 12]);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[test]
    fn header_len_counts_group_members() {
        let buf = FragmentPacket::new(FragmentHeader::new(1, vec![1, 2]), vec![0xFF]).encode();
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 8);
        // seq, count, then the two members, all little-endian.
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 1);
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), 2);
    }

    #[test]
    fn truncated_header_rejected() {
        let mut buf = FragmentPacket::new(FragmentHeader::new(1, vec![1, 2]), vec![0]).encode();
        buf.truncate(5);
        assert!(FragmentPacket::decode(&buf).is_err());
    }

    #[test]
    fn group_count_must_match_header_len() {
        // header_len claims 4 bytes but group count says one member.
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        assert!(matches!(
            FragmentPacket::decode(&buf),
            Err(StreamError::Parse {
                kind: ParseErrorKind::FragmentLengthMismatch
            })
        ));
    }

    #[test]
    fn empty_payload_round_trips() {
        let packet = FragmentPacket::new(FragmentHeader::new(3, Vec::new()), Vec::new());
        let decoded = FragmentPacket::decode(&packet.encode()).unwrap();
        assert!(decoded.payload.is_empty());
    }
}
