//! Inbound message framing.
//!
//! TCP is a byte stream, so a single receive may carry part of a message
//! or several of them. `FrameDecoder` turns receives into messages:
//!
//! - `Line`: frames end with `\n` (kept in the frame); partial lines are
//!   buffered across receives up to `max_line_length` bytes.
//! - `Raw`: every receive is one frame, nothing is buffered.

use crate::config::FramingMode;
use bytes::{Bytes, BytesMut};
use std::io;

/// Per-connection frame accumulator.
#[derive(Debug)]
pub struct FrameDecoder {
    mode: FramingMode,
    max_line_length: usize,
    /// Bytes of an unterminated line (line mode only).
    partial: BytesMut,
}

impl FrameDecoder {
    pub fn new(mode: FramingMode, max_line_length: usize) -> Self {
        Self {
            mode,
            max_line_length,
            partial: BytesMut::new(),
        }
    }

    /// Feed one receive and append every completed frame to `out`.
    ///
    /// Fails with `InvalidData` when a line grows past the configured
    /// maximum without a terminator.
    pub fn decode(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        match self.mode {
            FramingMode::Raw => {
                out.push(Bytes::copy_from_slice(chunk));
            }
            FramingMode::Line => {
                self.partial.extend_from_slice(chunk);
                // Only the new bytes can contain a terminator
                let mut search_from = self.partial.len() - chunk.len();
                while let Some(pos) = self.partial[search_from..].iter().position(|&b| b == b'\n')
                {
                    let end = search_from + pos + 1;
                    out.push(self.partial.split_to(end).freeze());
                    search_from = 0;
                }
                if self.partial.len() > self.max_line_length {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "line exceeds {} bytes without a terminator",
                            self.max_line_length
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Take whatever unterminated bytes remain, e.g. at end of stream.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.partial.is_empty() {
            None
        } else {
            Some(self.partial.split().freeze())
        }
    }

    /// Bytes currently buffered without a terminator.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> FrameDecoder {
        FrameDecoder::new(FramingMode::Line, 16)
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut decoder = lines();
        let mut out = Vec::new();

        decoder.decode(b"hel", &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(decoder.pending(), 3);

        decoder.decode(b"lo\nwor", &mut out).unwrap();
        assert_eq!(out, vec![Bytes::from_static(b"hello\n")]);
        assert_eq!(decoder.pending(), 3);

        decoder.decode(b"ld\n", &mut out).unwrap();
        assert_eq!(out[1], Bytes::from_static(b"world\n"));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_line_coalesced_reads() {
        let mut decoder = lines();
        let mut out = Vec::new();

        decoder.decode(b"/nick bob\nhello\n\n", &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                Bytes::from_static(b"/nick bob\n"),
                Bytes::from_static(b"hello\n"),
                Bytes::from_static(b"\n"),
            ]
        );
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = lines();
        let mut out = Vec::new();

        decoder.decode(b"0123456789", &mut out).unwrap();
        let err = decoder.decode(b"0123456789", &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_long_input_with_terminators_is_fine() {
        let mut decoder = lines();
        let mut out = Vec::new();

        decoder
            .decode(b"0123456789\n0123456789\n0123", &mut out)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(decoder.finish(), Some(Bytes::from_static(b"0123")));
    }

    #[test]
    fn test_raw_passthrough() {
        let mut decoder = FrameDecoder::new(FramingMode::Raw, 4);
        let mut out = Vec::new();

        decoder.decode(b"no newline here", &mut out).unwrap();
        decoder.decode(b"a\nb\n", &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                Bytes::from_static(b"no newline here"),
                Bytes::from_static(b"a\nb\n"),
            ]
        );
        assert_eq!(decoder.pending(), 0);
        assert!(decoder.finish().is_none());
    }
}
