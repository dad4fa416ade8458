use std::io::BufRead;

use crate::error::{ParseErrorKind, Result, StreamError};
use crate::protocol::PROTOCOL_VERSION;

/// Lines in every control request.
pub const REQUEST_LINES: usize = 3;

/// The six control methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Setup,
    Record,
    Play,
    Pause,
    Teardown,
    Describe,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::Describe => "DESCRIBE",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "SETUP" => Some(Self::Setup),
            "RECORD" => Some(Self::Record),
            "PLAY" => Some(Self::Play),
            "PAUSE" => Some(Self::Pause),
            "TEARDOWN" => Some(Self::Teardown),
            "DESCRIBE" => Some(Self::Describe),
            _ => None,
        }
    }
}

/// A parsed control request.
///
/// The three request lines are joined and read positionally:
///
/// ```text
/// token 0      1          2         3      4    5            6
/// METHOD       resource   RTSP/1.0  CSeq:  <n>  <attribute:> <value>
/// ```
#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub method: Method,
    pub resource: String,
    /// Request sequence number, echoed in the response.
    pub cseq: u32,
    /// Value of the method-specific third line: a transport descriptor
    /// for SETUP, a content type for DESCRIBE, a session token otherwise.
    pub parameter: String,
}

impl ControlRequest {
    /// Reads one three-line request off the control connection.
    ///
    /// Returns `Ok(None)` when the peer disconnected (including mid-request),
    /// which the session layer treats as an implicit teardown.
    pub fn read(reader: &mut impl BufRead) -> Result<Option<Self>> {
        let mut lines = Vec::with_capacity(REQUEST_LINES);
        for _ in 0..REQUEST_LINES {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            lines.push(line.trim_end().to_string());
        }
        Self::parse(&lines.join(" ")).map(Some)
    }

    /// Parses the joined request text by token position.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            });
        }
        if tokens.len() < 5 {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = Method::from_token(tokens[0]).ok_or(StreamError::Parse {
            kind: ParseErrorKind::UnknownMethod,
        })?;
        if tokens[2] != PROTOCOL_VERSION {
            tracing::warn!(version = tokens[2], "peer sent unexpected protocol version");
        }
        let cseq = tokens[4].parse().map_err(|_| StreamError::Parse {
            kind: ParseErrorKind::InvalidSequence,
        })?;

        Ok(Self {
            method,
            resource: tokens[1].to_string(),
            cseq,
            parameter: tokens.get(6).unwrap_or(&"").to_string(),
        })
    }

    /// Media port (and optional reverse control port) from a SETUP
    /// transport descriptor like `RTP/UDP;client_port=5004,5005`.
    pub fn client_ports(&self) -> Option<(u16, Option<u16>)> {
        let values = parse_parameter(&self.parameter, "client_port")?;
        let media = values.first()?.parse().ok()?;
        let reverse = values.get(1).and_then(|v| v.parse().ok());
        Some((media, reverse))
    }
}

/// Formats a three-line request. `attribute` is the complete third line
/// without its terminator, e.g. `Session: 00AB12`.
pub fn format_request(method: Method, resource: &str, cseq: u32, attribute: &str) -> String {
    format!(
        "{} {} {}\r\nCSeq: {}\r\n{}\r\n",
        method.as_str(),
        resource,
        PROTOCOL_VERSION,
        cseq,
        attribute
    )
}

/// Extracts a named parameter's comma-separated values from a
/// semicolon-separated descriptor, e.g. `client_port` from
/// `RTP/UDP;client_port=5004,5005`.
pub fn parse_parameter<'a>(text: &'a str, name: &str) -> Option<Vec<&'a str>> {
    for part in text.split(';') {
        if let Some(values) = part.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')) {
            return Some(values.split(',').collect());
        }
    }
    None
}
