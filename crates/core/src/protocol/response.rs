use std::fmt;

use crate::error::{ParseErrorKind, Result, StreamError};
use crate::protocol::{PROTOCOL_VERSION, parse_parameter};

/// A control response.
///
/// Serializes to the compact wire format the peer's positional parser
/// expects — status line, headers, then the body directly (no blank
/// separator line):
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Session: 00000000DEADBEEF\r\n
/// Transport: server_port=5006\r\n
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
pub struct ControlResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ControlResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// 200 OK — the only status this stack sends; requests it will not
    /// honor are ignored rather than refused.
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn add_header(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// before it.
    pub fn serialize(&self) -> String {
        let mut response = format!(
            "{} {} {}\r\n",
            PROTOCOL_VERSION, self.status_code, self.status_text
        );
        for (name, value) in &self.headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str(body);
        }
        response
    }
}

/// Flattened positional view of a response, for the requesting side.
///
/// Token positions in a headers-only response:
///
/// ```text
/// token 0         1     2   3      4    5         6       7...
/// RTSP/1.0        code  OK  CSeq:  <n>  Session:  <id>    ...
/// ```
#[derive(Debug)]
pub struct ResponseFields {
    pub status_code: u16,
    tokens: Vec<String>,
}

impl ResponseFields {
    /// Splits a raw response into whitespace tokens and validates the
    /// status line.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        let status_code = tokens
            .get(1)
            .and_then(|code| code.parse().ok())
            .ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            })?;
        Ok(Self {
            status_code,
            tokens,
        })
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    /// Parses a named parameter out of the token at `index`, e.g.
    /// `server_port` out of a `Transport: server_port=5006` header.
    pub fn parameter(&self, index: usize, name: &str) -> Option<Vec<&str>> {
        parse_parameter(self.token(index)?, name)
    }
}
