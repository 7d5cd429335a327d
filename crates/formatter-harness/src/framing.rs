//! `Content-Length` framed message stream.
//!
//! Each frame is a header block followed by a JSON body:
//!
//! ```text
//! Content-Length: 42\r\n
//! X-Ignored: anything\r\n
//! \r\n
//! {"result": ...}
//! ```
//!
//! Lines before the `Content-Length` header are skipped, the remaining header
//! lines are ignored up to the blank separator line, and exactly `N` bytes of
//! body are parsed as JSON.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

const CONTENT_LENGTH: &str = "Content-Length:";
const CRLF: &[u8] = b"\r\n";

/// Lazy iterator over the JSON messages of a framed input buffer.
///
/// Iteration stops at the end of the input, at the first fatal error, or when
/// no further `Content-Length` header can be found. In the last case the
/// number of unconsumed bytes is available from [`MessageFramer::trailing_bytes`].
pub struct MessageFramer<'a> {
    input: &'a [u8],
    consumed: usize,
    trailing: Option<usize>,
    done: bool,
}

impl<'a> MessageFramer<'a> {
    /// Create a framer over a complete input buffer.
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            consumed: 0,
            trailing: None,
            done: false,
        }
    }

    /// Bytes left unparsed at the end of the stream, if any.
    ///
    /// Only meaningful once the iterator is exhausted.
    pub fn trailing_bytes(&self) -> Option<usize> {
        self.trailing
    }

    /// Total bytes consumed by successfully framed messages.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    fn stop_with_trailing(&mut self) {
        let remaining = self.input.len();
        warn!("Didn't consume {} bytes at the end of input", remaining);
        self.trailing = Some(remaining);
        self.done = true;
    }

    fn next_frame(&mut self) -> Option<Result<Value>> {
        let (length, after_length) = match find_content_length(self.input) {
            Ok(Some(found)) => found,
            Ok(None) => {
                self.stop_with_trailing();
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let Some(body) = skip_headers(after_length) else {
            // Header block runs into end-of-stream; leave it untouched.
            self.stop_with_trailing();
            return None;
        };

        if body.len() < length {
            self.done = true;
            return Some(Err(HarnessError::Framing(format!(
                "body truncated: expected {} bytes, {} available",
                length,
                body.len()
            ))));
        }

        let (payload, rest) = body.split_at(length);
        let value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };

        self.consumed += self.input.len() - rest.len();
        self.input = rest;
        debug!(length, consumed = self.consumed, "framed message");
        Some(Ok(value))
    }
}

impl Iterator for MessageFramer<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.input.is_empty() {
            return None;
        }
        self.next_frame()
    }
}

/// Split off one line. Returns the line (without terminator), the rest, and
/// whether a CR-LF terminator was found.
fn split_line(input: &[u8]) -> (&[u8], &[u8], bool) {
    match input.windows(CRLF.len()).position(|w| w == CRLF) {
        Some(eol) => (&input[..eol], &input[eol + CRLF.len()..], true),
        None => (input, &[], false),
    }
}

/// Scan forward for the `Content-Length` header, returning the declared body
/// length and the input following that header line.
fn find_content_length(mut input: &[u8]) -> Result<Option<(usize, &[u8])>> {
    while !input.is_empty() {
        let (line, rest, _) = split_line(input);
        input = rest;

        let Some(value) = line.strip_prefix(CONTENT_LENGTH.as_bytes()) else {
            continue;
        };
        let value = std::str::from_utf8(value)
            .map_err(|_| HarnessError::Framing("Content-Length value is not UTF-8".into()))?
            .trim();
        let length = value.parse::<usize>().map_err(|_| {
            HarnessError::Framing(format!("invalid Content-Length value `{}`", value))
        })?;
        return Ok(Some((length, input)));
    }
    Ok(None)
}

/// Skip the remaining header lines up to and including the blank separator.
/// Returns `None` when the stream ends before the separator.
fn skip_headers(mut input: &[u8]) -> Option<&[u8]> {
    loop {
        let (line, rest, terminated) = split_line(input);
        if !terminated {
            return None;
        }
        if line.is_empty() {
            return Some(rest);
        }
        input = rest;
    }
}

/// Wrap a JSON value in a `Content-Length` frame.
pub fn encode_frame(value: &Value) -> Vec<u8> {
    let body = value.to_string();
    let mut frame = format!("{} {}\r\n\r\n", CONTENT_LENGTH, body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_through_framing() {
        let messages = vec![
            json!({"result": {"value": {"code": "AGFzbQ=="}}}),
            json!({"result": ["global.c"]}),
            json!({"result": {"name": "I", "scope": "GLOBAL", "type": "int"}}),
        ];
        let input: Vec<u8> = messages.iter().flat_map(encode_frame).collect();

        let mut framer = MessageFramer::new(&input);
        let decoded: Vec<Value> = framer.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(decoded, messages);
        assert_eq!(framer.trailing_bytes(), None);
        assert_eq!(framer.consumed(), input.len());
    }

    #[test]
    fn test_extra_headers_are_ignored() {
        let input = b"Content-Length: 2\r\nContent-Type: application/json\r\n\r\n{}";
        let decoded: Vec<Value> = MessageFramer::new(input).collect::<Result<_>>().unwrap();
        assert_eq!(decoded, vec![json!({})]);
    }

    #[test]
    fn test_leading_noise_is_skipped() {
        let input = b"garbage line\r\nContent-Length: 4\r\n\r\nnull";
        let decoded: Vec<Value> = MessageFramer::new(input).collect::<Result<_>>().unwrap();
        assert_eq!(decoded, vec![Value::Null]);
    }

    #[test]
    fn test_trailing_input_is_reported() {
        let mut input = encode_frame(&json!({"result": 1}));
        input.extend_from_slice(b"\r\nleftover");

        let mut framer = MessageFramer::new(&input);
        assert_eq!(framer.next().unwrap().unwrap(), json!({"result": 1}));
        assert!(framer.next().is_none());
        assert_eq!(framer.trailing_bytes(), Some(10));
    }

    #[test]
    fn test_unterminated_header_block_yields_nothing() {
        let input = b"Content-Length: 2\r\nX-Other: 1";
        let mut framer = MessageFramer::new(input);
        assert!(framer.next().is_none());
        assert_eq!(framer.trailing_bytes(), Some(input.len()));
    }

    #[test]
    fn test_non_numeric_length_is_fatal() {
        let input = b"Content-Length: 12abc\r\n\r\n{}";
        let mut framer = MessageFramer::new(input);
        assert!(matches!(framer.next(), Some(Err(HarnessError::Framing(_)))));
        assert!(framer.next().is_none());
    }

    #[test]
    fn test_truncated_body_is_fatal() {
        let input = b"Content-Length: 10\r\n\r\n{}";
        let mut framer = MessageFramer::new(input);
        assert!(matches!(framer.next(), Some(Err(HarnessError::Framing(_)))));
    }

    #[test]
    fn test_invalid_json_body() {
        let input = b"Content-Length: 3\r\n\r\n{x}";
        let mut framer = MessageFramer::new(input);
        assert!(matches!(framer.next(), Some(Err(HarnessError::Json(_)))));
    }

    #[test]
    fn test_empty_input() {
        let mut framer = MessageFramer::new(b"");
        assert!(framer.next().is_none());
        assert_eq!(framer.trailing_bytes(), None);
    }
}
