//! Decoder for the chunked transfer coding, see
//! [RFC 9112 Section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1).
//!
//! Chunk extensions and trailer fields are accepted and discarded.

use crate::codec::body::PayloadItem;
use crate::ensure;
use crate::protocol::ParseError;
use bytes::{Buf, BytesMut};
use std::cmp;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Longest size or trailer line we are willing to buffer.
const MAX_LINE_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Expecting `<hex size>[;ext]\r\n`
    Size,
    /// Inside chunk data, with the number of bytes left
    Data(u64),
    /// Expecting the CRLF closing a chunk
    DataEnd,
    /// Skipping trailer lines until the empty line
    Trailer,
    End,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkedState::Size }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match src.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let mut line = src.split_to(pos + 2);
            line.truncate(pos);
            Ok(Some(line))
        }
        None => {
            ensure!(src.len() <= MAX_LINE_BYTES, ParseError::invalid_body("chunk line too long"));
            Ok(None)
        }
    }
}

fn parse_size(line: &[u8]) -> Result<u64, ParseError> {
    let digits = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    ensure!(!digits.is_empty(), ParseError::invalid_body("empty chunk size"));

    digits.iter().try_fold(0u64, |size, b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(ParseError::invalid_body("invalid chunk size")),
        };
        size.checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .ok_or_else(|| ParseError::invalid_body("invalid overflow chunked length"))
    })
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ChunkedState::Size => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_size(&line)?;
                    trace!(size, "read chunk size");
                    self.state = if size == 0 { ChunkedState::Trailer } else { ChunkedState::Data(size) };
                }
                ChunkedState::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = cmp::min(remaining, src.len() as u64);
                    let bytes = src.split_to(len as usize).freeze();
                    let remaining = remaining - len;
                    self.state = if remaining == 0 { ChunkedState::DataEnd } else { ChunkedState::Data(remaining) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                ChunkedState::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    ensure!(&src[..2] == b"\r\n", ParseError::invalid_body("missing CRLF after chunk data"));
                    src.advance(2);
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Trailer => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        trace!("finished reading chunked data");
                        self.state = ChunkedState::End;
                    }
                }
                ChunkedState::End => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut ChunkedDecoder, buffer: &mut BytesMut) -> (Vec<u8>, bool) {
        let mut body = Vec::new();
        loop {
            match decoder.decode(buffer).unwrap() {
                Some(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => return (body, true),
                None => return (body, false),
            }
        }
    }

    #[test]
    fn decode_chunks_with_extension_and_trailer() {
        let mut buffer = BytesMut::from(&b"5;name=v\r\nhello\r\n6\r\n world\r\n0\r\nExpires: never\r\n\r\nGET"[..]);
        let mut decoder = ChunkedDecoder::new();

        let (body, finished) = drain(&mut decoder, &mut buffer);
        assert!(finished);
        assert_eq!(body, b"hello world");
        assert_eq!(&buffer[..], b"GET");
    }

    #[test]
    fn decode_across_partial_reads() {
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"A\r\n01234"[..]);

        let (body, finished) = drain(&mut decoder, &mut buffer);
        assert!(!finished);
        assert_eq!(body, b"01234");

        buffer.extend_from_slice(b"56789\r\n0\r\n\r\n");
        let (body, finished) = drain(&mut decoder, &mut buffer);
        assert!(finished);
        assert_eq!(body, b"56789");
    }

    #[test]
    fn reject_invalid_size() {
        let mut buffer = BytesMut::from(&b"zz\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }
}
