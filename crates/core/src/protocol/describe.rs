//! Stream description (DESCRIBE) payload.
//!
//! The description is a minimal SDP-shaped document announcing the media
//! line, the control identifier, and the encoding:
//!
//! ```text
//! v=0
//! m=video 9000 RTP/AVP 26
//! a=control:streamid=0
//! a=mimetype:string;"video/MJPEG"
//! ```

use crate::protocol::response::ControlResponse;

/// Encoding announced in the description.
pub const MEDIA_TYPE: &str = "video/MJPEG";

/// Builds the description body for one stream.
pub fn describe_body(control_port: u16, payload_type: u8, stream_id: u32) -> String {
    format!(
        "v=0\r\nm=video {control_port} RTP/AVP {payload_type}\r\na=control:streamid={stream_id}\r\na=mimetype:string;\"{MEDIA_TYPE}\"\r\n"
    )
}

/// Builds a full DESCRIBE response: standard headers, content metadata,
/// and the description body.
pub fn describe_response(
    cseq: u32,
    session_id: impl std::fmt::Display,
    resource: &str,
    control_port: u16,
    payload_type: u8,
) -> ControlResponse {
    ControlResponse::ok()
        .add_header("CSeq", cseq)
        .add_header("Session", session_id)
        .add_header("Content-Base", resource)
        .add_header("Content-Type", "application/sdp")
        .with_body(describe_body(control_port, payload_type, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_lists_media_line_and_control() {
        let body = describe_body(9000, 26, 0);
        assert!(body.starts_with("v=0\r\n"));
        assert!(body.contains("m=video 9000 RTP/AVP 26\r\n"));
        assert!(body.contains("a=control:streamid=0\r\n"));
        assert!(body.contains("\"video/MJPEG\""));
    }

    #[test]
    fn response_carries_sdp_content_type() {
        let text = describe_response(4, "0000000000000001", "stream", 9000, 26).serialize();
        assert!(text.contains("Content-Type: application/sdp\r\n"));
        assert!(text.contains("Content-Base: stream\r\n"));
        assert!(text.contains("m=video 9000 RTP/AVP 26"));
    }
}
