//! Media packet fixed header (RFC 3550 §5.1 layout).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All multi-byte fields are big-endian. One packet carries one complete
//! frame; the fragment layer below splits oversized packets, so sequence
//! numbers here count frames, not datagrams.

use crate::error::{ParseErrorKind, Result, StreamError};

/// Size of the fixed header in bytes.
pub const RTP_HEADER_LEN: usize = 12;

/// Protocol version written into every header.
pub const RTP_VERSION: u8 = 2;

/// Synthetic stream identifier stamped on every packet.
///
/// Endpoints are paired one sender to one receiver, so a fixed value
/// identifies the stream well enough; nothing demultiplexes on it.
pub const DEFAULT_SSRC: u32 = 9999;

/// Decoded media packet fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    /// Payload type (7-bit); 26 marks motion JPEG frames.
    pub payload_type: u8,
    /// Frame counter, wrapping at 16 bits on the wire.
    pub sequence_number: u16,
    /// Media clock: frame counter scaled by the frame period in ms.
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Creates a header for an outgoing frame.
    ///
    /// Version is 2; padding, extension, CSRC count and marker are zero;
    /// SSRC is [`DEFAULT_SSRC`].
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc: DEFAULT_SSRC,
        }
    }

    /// Serializes the 12-byte fixed header.
    pub fn encode(&self) -> [u8; RTP_HEADER_LEN] {
        let first_byte = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0x0f);
        let second_byte = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parses the fixed header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::ShortMediaHeader,
            });
        }
        Ok(Self {
            version: buf[0] >> 6,
            padding: (buf[0] >> 5) & 1 != 0,
            extension: (buf[0] >> 4) & 1 != 0,
            csrc_count: buf[0] & 0x0f,
            marker: buf[1] >> 7 != 0,
            payload_type: buf[1] & 0x7f,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// A media packet: fixed header plus one complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Serializes header followed by payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses a packet; everything after the fixed header is payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = RtpHeader::decode(buf)?;
        Ok(Self {
            header,
            payload: buf[RTP_HEADER_LEN..].to_vec(),
        })
    }
}
