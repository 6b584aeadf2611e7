//! Newline-delimited frame splitter for client connections.
//!
//! Clients send one UTF-8 JSON object per line:
//!
//!   `{"type":"ping"}\n`
//!
//! The framer can be fed arbitrary read chunks and yields whole frames when
//! available. The buffer never grows past the configured limit: an overlong
//! line is reported once and then skipped up to its terminating newline.
use bytes::BytesMut;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds {limit} bytes")]
    Oversize { limit: usize },
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Json(Value),
    /// Text that is not JSON at all; handed to the raw-message handler.
    Text(String),
}

pub struct LineFramer {
    buf: BytesMut,
    max_frame: usize,
    /// Dropping bytes until the next newline after an oversize frame.
    discarding: bool,
    /// Prefix of `buf` already searched for a newline.
    scanned: usize,
}

impl LineFramer {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_frame.min(4096)),
            max_frame,
            discarding: false,
            scanned: 0,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        loop {
            let found = self.buf[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(pos) = found.map(|offset| self.scanned + offset) else {
                self.scanned = self.buf.len();
                if self.discarding {
                    self.buf.clear();
                    self.scanned = 0;
                    return None;
                }
                if self.buf.len() > self.max_frame {
                    self.buf.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    return Some(Err(FrameError::Oversize {
                        limit: self.max_frame,
                    }));
                }
                return None;
            };

            let line = self.buf.split_to(pos + 1);
            self.scanned = 0;
            if self.discarding {
                // tail of a frame already reported as oversize
                self.discarding = false;
                continue;
            }
            if pos > self.max_frame {
                return Some(Err(FrameError::Oversize {
                    limit: self.max_frame,
                }));
            }

            let mut body = &line[..pos];
            if body.last() == Some(&b'\r') {
                body = &body[..body.len() - 1];
            }
            let Ok(text) = std::str::from_utf8(body) else {
                return Some(Err(FrameError::InvalidUtf8));
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            return Some(Ok(match serde_json::from_str::<Value>(text) {
                Ok(value) => Frame::Json(value),
                Err(_) => Frame::Text(text.to_string()),
            }));
        }
    }
}
