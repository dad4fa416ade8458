//! Session control protocol.
//!
//! A compact, RTSP-flavored exchange over the per-session TCP connection.
//! Every request is exactly three CRLF-terminated lines:
//!
//! ```text
//! SETUP stream RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Transport: RTP/UDP;client_port=5004,5005\r\n
//! ```
//!
//! The third line depends on the method: `Transport` for SETUP, `Accept`
//! for DESCRIBE, `Session` for everything else. Parsing is positional —
//! the three lines are joined, split on whitespace, and read by token
//! index — so header names are carried for readability, not dispatch.
//!
//! ## Supported methods
//!
//! | Method | Valid from | Purpose |
//! |--------|------------|---------|
//! | SETUP | Init | Negotiate ports, allocate the media plane |
//! | RECORD | Ready | Start ingesting the client's live feed |
//! | PLAY | Ready | Start media delivery to the client |
//! | PAUSE | Playing, Recording | Suspend delivery or ingest |
//! | TEARDOWN | any | Release the session's media plane |
//! | DESCRIBE | any | Retrieve the stream description |
//!
//! A request arriving in a state its method is not valid from is logged
//! and ignored; no response goes back. Peers rely on their own state
//! guards rather than errors from the other side.

pub mod describe;
pub mod request;
pub mod response;

pub use request::{ControlRequest, Method, format_request, parse_parameter};
pub use response::{ControlResponse, ResponseFields};

/// Version tag carried in request and status lines.
pub const PROTOCOL_VERSION: &str = "RTSP/1.0";
