//! Loss feedback packet (receiver-report style).
//!
//! A fixed 24-byte layout: an 8-byte header followed by three report
//! fields. Header fields are big-endian; the report body is little-endian,
//! with the loss fraction carried as raw IEEE-754 bits.
//!
//! ```text
//! byte  0        1        2   3      4..8
//!      |V|P| RC | PT=201 | length | SSRC  |
//! byte  8..16           16..20       20..24
//!      | fraction (f64) | cumulative | highest seq |
//! ```

use crate::error::{ParseErrorKind, Result, StreamError};
use crate::wire::rtp::DEFAULT_SSRC;

/// Size of the feedback header in bytes.
pub const RTCP_HEADER_LEN: usize = 8;

/// Size of the whole feedback packet in bytes.
pub const RTCP_PACKET_LEN: usize = 24;

/// Packet type tag for receiver reports.
pub const RTCP_PAYLOAD_TYPE: u8 = 201;

/// Fixed value of the header length field.
pub const RTCP_LENGTH_FIELD: u16 = 32;

/// Feedback packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub version: u8,
    pub padding: bool,
    pub report_count: u8,
    pub payload_type: u8,
    pub length: u16,
    pub ssrc: u32,
}

impl RtcpHeader {
    /// Serializes the 8-byte header.
    pub fn encode(&self) -> [u8; RTCP_HEADER_LEN] {
        let mut header = [0u8; RTCP_HEADER_LEN];
        header[0] = (self.version << 6) | ((self.padding as u8) << 5) | (self.report_count & 0x1f);
        header[1] = self.payload_type;
        header[2..4].copy_from_slice(&self.length.to_be_bytes());
        header[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parses the header from the front of `buf`. Length is checked by
    /// [`FeedbackPacket::decode`], which needs the full 24 bytes anyway.
    fn decode(buf: &[u8]) -> Self {
        Self {
            version: buf[0] >> 6,
            padding: (buf[0] >> 5) & 1 != 0,
            report_count: buf[0] & 0x1f,
            payload_type: buf[1],
            length: u16::from_be_bytes([buf[2], buf[3]]),
            ssrc: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl Default for RtcpHeader {
    /// Header for an outgoing report: version 2, one report block,
    /// fixed length field, shared stream id.
    fn default() -> Self {
        Self {
            version: 2,
            padding: false,
            report_count: 1,
            payload_type: RTCP_PAYLOAD_TYPE,
            length: RTCP_LENGTH_FIELD,
            ssrc: DEFAULT_SSRC,
        }
    }
}

/// One loss report from receiver to sender.
///
/// `fraction_lost` covers the interval since the previous report;
/// `cumulative_lost` and `highest_seq` are running totals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackPacket {
    pub header: RtcpHeader,
    pub fraction_lost: f64,
    pub cumulative_lost: u32,
    pub highest_seq: u32,
}

impl FeedbackPacket {
    pub fn new(fraction_lost: f64, cumulative_lost: u32, highest_seq: u32) -> Self {
        Self {
            header: RtcpHeader::default(),
            fraction_lost,
            cumulative_lost,
            highest_seq,
        }
    }

    /// Serializes the 24-byte packet.
    pub fn encode(&self) -> [u8; RTCP_PACKET_LEN] {
        let mut buf = [0u8; RTCP_PACKET_LEN];
        buf[..RTCP_HEADER_LEN].copy_from_slice(&self.header.encode());
        buf[8..16].copy_from_slice(&self.fraction_lost.to_bits().to_le_bytes());
        buf[16..20].copy_from_slice(&self.cumulative_lost.to_le_bytes());
        buf[20..24].copy_from_slice(&self.highest_seq.to_le_bytes());
        buf
    }

    /// Parses a 24-byte packet from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTCP_PACKET_LEN {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::ShortFeedbackPacket,
            });
        }
        let bits = u64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        Ok(Self {
            header: RtcpHeader::decode(buf),
            fraction_lost: f64::from_bits(bits),
            cumulative_lost: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            highest_seq: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trips() {
        let packet = FeedbackPacket::new(0.375, 12, 480);
        let decoded = FeedbackPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.header, packet.header);
        assert_eq!(decoded.fraction_lost.to_bits(), packet.fraction_lost.to_bits());
        assert_eq!(decoded.cumulative_lost, 12);
        assert_eq!(decoded.highest_seq, 480);
    }

    #[test]
    fn header_defaults() {
        let header = RtcpHeader::default();
        let buf = header.encode();
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[0] & 0x1f, 1);
        assert_eq!(buf[1], RTCP_PAYLOAD_TYPE);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), RTCP_LENGTH_FIELD);
        assert_eq!(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]), 9999);
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(FeedbackPacket::decode(&[0u8; 23]).is_err());
    }

    #[test]
    fn zero_fraction_encodes_to_zero_bits() {
        let buf = FeedbackPacket::new(0.0, 0, 0).encode();
        assert_eq!(&buf[8..16], &[0u8; 8]);
    }
}
