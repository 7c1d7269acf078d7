//! Length-prefixed framing used by the long-poll body.
//!
//! Each chunk is a decimal length, a newline, then that many UTF-16 code
//! units of text. Reads can split a chunk (or a UTF-8 sequence) anywhere, so
//! the parser buffers raw bytes and only decodes the valid prefix.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Lengths longer than this are not lengths.
const MAX_LENGTH_DIGITS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("expected a chunk length, found {0:?}")]
    BadLength(String),
    #[error("chunk of {length} UTF-16 units ends inside a surrogate pair")]
    SplitSurrogate { length: usize },
    #[error("invalid UTF-8 inside a chunk payload")]
    InvalidUtf8,
}

#[derive(Debug, Default)]
pub struct ChunkParser {
    buffer: BytesMut,
}

impl ChunkParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet emitted as part of a chunk.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Appends `data` and returns every chunk that is now complete.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<String>, ChunkError> {
        self.buffer.extend_from_slice(data);
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    fn next_chunk(&mut self) -> Result<Option<String>, ChunkError> {
        let whitespace = self
            .buffer
            .iter()
            .take_while(|byte| byte.is_ascii_whitespace())
            .count();
        self.buffer.advance(whitespace);
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let (text, invalid) = valid_prefix(&self.buffer);
        let Some(newline) = text.find('\n') else {
            if text.len() > MAX_LENGTH_DIGITS || !text.bytes().all(|b| b.is_ascii_digit()) || invalid {
                return Err(ChunkError::BadLength(preview(text)));
            }
            return Ok(None);
        };

        let length_line = text[..newline].trim_end_matches('\r');
        if length_line.is_empty()
            || length_line.len() > MAX_LENGTH_DIGITS
            || !length_line.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ChunkError::BadLength(preview(length_line)));
        }
        let length: usize = length_line
            .parse()
            .map_err(|_| ChunkError::BadLength(preview(length_line)))?;

        let payload = &text[newline + 1..];
        let Some(end) = utf16_boundary(payload, length)? else {
            if invalid {
                return Err(ChunkError::InvalidUtf8);
            }
            return Ok(None);
        };
        let chunk = payload[..end].to_string();
        let consumed = newline + 1 + end;
        self.buffer.advance(consumed);
        Ok(Some(chunk))
    }
}

/// Longest valid UTF-8 prefix, and whether decoding stopped at an invalid
/// byte rather than an incomplete trailing sequence.
fn valid_prefix(buffer: &[u8]) -> (&str, bool) {
    match std::str::from_utf8(buffer) {
        Ok(text) => (text, false),
        Err(err) => {
            let text = std::str::from_utf8(&buffer[..err.valid_up_to()]).unwrap_or_default();
            (text, err.error_len().is_some())
        }
    }
}

/// Byte offset in `text` after exactly `units` UTF-16 code units, or `None`
/// if `text` is still too short.
fn utf16_boundary(text: &str, units: usize) -> Result<Option<usize>, ChunkError> {
    if units == 0 {
        return Ok(Some(0));
    }
    let mut counted = 0;
    for (index, ch) in text.char_indices() {
        counted += ch.len_utf16();
        if counted == units {
            return Ok(Some(index + ch.len_utf8()));
        }
        if counted > units {
            return Err(ChunkError::SplitSurrogate { length: units });
        }
    }
    Ok(None)
}

fn preview(text: &str) -> String {
    text.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &str) -> Vec<u8> {
        format!("{}\n{}", payload.encode_utf16().count(), payload).into_bytes()
    }

    #[test_timeout::timeout]
    fn single_chunk_in_one_read() {
        let mut parser = ChunkParser::new();
        let chunks = parser.feed(b"11\n[[0,[\"a\"]]]").unwrap();
        assert_eq!(chunks, vec!["[[0,[\"a\"]]]".to_string()]);
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test_timeout::timeout]
    fn emoji_counts_as_two_units() {
        let payload = "[[1,[\"😀\"]]]";
        assert_eq!(payload.encode_utf16().count(), 12);
        let mut parser = ChunkParser::new();
        assert_eq!(parser.feed(&frame(payload)).unwrap(), vec![payload.to_string()]);
    }

    #[test_timeout::timeout]
    fn every_split_point_yields_the_same_chunks() {
        let payloads = ["[[0,[\"c\",\"S1\"]]]", "[[1,\"héllo 😀 wörld\"]]", "[[2,\"noop\"]]"];
        let stream: Vec<u8> = payloads.iter().flat_map(|payload| frame(payload)).collect();
        let expected: Vec<String> = payloads.iter().map(|payload| payload.to_string()).collect();

        for split in 0..=stream.len() {
            let mut parser = ChunkParser::new();
            let mut chunks = parser.feed(&stream[..split]).unwrap();
            chunks.extend(parser.feed(&stream[split..]).unwrap());
            assert_eq!(chunks, expected, "split at {split}");
            assert_eq!(parser.pending_bytes(), 0, "split at {split}");
        }
    }

    #[test_timeout::timeout]
    fn byte_at_a_time_feeding() {
        let payload = "[[5,[\"日本語 🎉\"]]]";
        let mut parser = ChunkParser::new();
        let mut chunks = Vec::new();
        for byte in frame(payload) {
            chunks.extend(parser.feed(&[byte]).unwrap());
        }
        assert_eq!(chunks, vec![payload.to_string()]);
    }

    #[test_timeout::timeout]
    fn whitespace_between_chunks_is_skipped() {
        let mut parser = ChunkParser::new();
        let chunks = parser.feed(b"\n3\nabc\r\n 2\nde").unwrap();
        assert_eq!(chunks, vec!["abc".to_string(), "de".to_string()]);
    }

    #[test_timeout::timeout]
    fn garbage_length_is_a_framing_error() {
        let mut parser = ChunkParser::new();
        assert!(matches!(parser.feed(b"xyz\n[]"), Err(ChunkError::BadLength(_))));

        let mut parser = ChunkParser::new();
        assert!(matches!(parser.feed(b"12345678901"), Err(ChunkError::BadLength(_))));

        let mut parser = ChunkParser::new();
        assert_eq!(parser.feed(b"1234").unwrap(), Vec::<String>::new());
    }

    #[test_timeout::timeout]
    fn length_ending_inside_a_surrogate_pair_is_rejected() {
        let mut parser = ChunkParser::new();
        let err = parser.feed("1\n😀".as_bytes()).unwrap_err();
        assert_eq!(err, ChunkError::SplitSurrogate { length: 1 });
    }

    #[test_timeout::timeout]
    fn invalid_utf8_inside_payload_is_rejected() {
        let mut parser = ChunkParser::new();
        assert_eq!(parser.feed(b"4\nab\xffcd").unwrap_err(), ChunkError::InvalidUtf8);
    }
}
