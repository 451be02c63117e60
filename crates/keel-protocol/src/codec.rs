// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `Content-Length` framing.
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JSON>
//! ```
//!
//! Frames may arrive split across reads or several to a read. The decoder
//! keeps a growable buffer and only yields a body once all of it is present.

use tracing::warn;

const CONTENT_LENGTH: &[u8] = b"Content-Length:";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Largest body the decoder accepts unless told otherwise.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Frames `body` for the wire.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that skips any frame declaring more than `max_frame_len`
    /// body bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes held but not yet yielded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Removes and returns the next complete body, if one is buffered.
    ///
    /// Bytes before a `Content-Length` header are discarded. A header whose
    /// length does not parse, or exceeds the frame limit, is skipped along
    /// with its header block.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(start) = find(&self.buffer, CONTENT_LENGTH) else {
                self.discard_noise();
                return None;
            };
            let value_start = start + CONTENT_LENGTH.len();
            let header_end = find(&self.buffer[value_start..], HEADER_END)? + value_start;

            // The length value runs to the end of its own header line.
            let line_end = find(&self.buffer[value_start..header_end + 2], b"\r\n")
                .map_or(header_end, |offset| offset + value_start);
            let body_start = header_end + HEADER_END.len();

            let length = std::str::from_utf8(&self.buffer[value_start..line_end])
                .ok()
                .and_then(|value| value.trim().parse::<usize>().ok());
            let Some(length) = length else {
                warn!(
                    header = %String::from_utf8_lossy(&self.buffer[start..header_end]),
                    "skipping frame with an unreadable Content-Length"
                );
                self.buffer.drain(..body_start);
                continue;
            };

            let frame_end = body_start
                .checked_add(length)
                .filter(|_| length <= self.max_frame_len);
            let Some(frame_end) = frame_end else {
                warn!(
                    length,
                    limit = self.max_frame_len,
                    "skipping frame larger than the frame limit"
                );
                self.buffer.drain(..body_start);
                continue;
            };

            if self.buffer.len() < frame_end {
                return None;
            }
            let body = self.buffer[body_start..frame_end].to_vec();
            self.buffer.drain(..frame_end);
            return Some(body);
        }
    }

    /// Drops bytes that can no longer begin a header, keeping a tail that
    /// might be the start of one.
    fn discard_noise(&mut self) {
        let keep = CONTENT_LENGTH.len() - 1;
        if self.buffer.len() > keep {
            let cut = self.buffer.len() - keep;
            self.buffer.drain(..cut);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
