//! Line framing for the session stream
//!
//! One JSON object per line, UTF-8, `\n`-terminated. Encoding always appends
//! the terminator; decoding tolerates `\r\n`. Lines beyond [`MAX_LINE_BYTES`]
//! are rejected so a misbehaving peer cannot force unbounded buffering.

use crate::error::{Error, Result};
use crate::protocol::messages::NavigationMessage;

/// Upper bound on a single message line
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Serialize one message as a newline-terminated JSON line
pub fn encode(message: &NavigationMessage) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one received line into a message
///
/// Undecodable input is a protocol error, never a panic; the session layer
/// drops such lines.
pub fn decode(line: &str) -> Result<NavigationMessage> {
    if line.len() > MAX_LINE_BYTES {
        return Err(Error::Protocol(format!(
            "line of {} bytes exceeds limit of {}",
            line.len(),
            MAX_LINE_BYTES
        )));
    }
    let trimmed = line.trim_end_matches(['\r', '\n']);
    serde_json::from_str(trimmed).map_err(|e| Error::Protocol(format!("bad message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::Waypoint;

    #[test]
    fn test_encode_terminates_with_newline() {
        let line = encode(&NavigationMessage::heartbeat()).unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line[..line.len() - 1].contains('\n'));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let message = NavigationMessage::route(vec![Waypoint::new(3.5, -1.25)], None);
        let line = encode(&message).unwrap();
        let decoded = decode(&line).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let message = decode("{\"type\":\"heartbeat\",\"timestamp\":42}\r\n").unwrap();
        assert_eq!(message.message_type(), "heartbeat");
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        let result = decode("not json at all\n");
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_unknown_type_is_protocol_error() {
        let result = decode(r#"{"type":"warp","timestamp":1}"#);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_oversize_line_rejected() {
        let padding = "x".repeat(MAX_LINE_BYTES + 1);
        let result = decode(&padding);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
