//! Ordered buffer of received chunks with line extraction

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Chunks received on one connection, oldest first.
///
/// A chunk is whatever one read produced: a stream read's bytes or one
/// datagram's payload. Empty chunks are never stored.
#[derive(Debug, Default)]
pub struct Inbox {
    chunks: VecDeque<Bytes>,
    data_ready: bool,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and raise the data-ready flag.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.chunks.push_back(chunk);
        self.data_ready = true;
    }

    /// Test and clear the data-ready flag.
    pub fn take_data_ready(&mut self) -> bool {
        std::mem::take(&mut self.data_ready)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of buffered chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Remove every chunk, concatenated.
    pub fn take_all(&mut self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.pop_front().unwrap_or_default(),
            _ => {
                let mut all = BytesMut::with_capacity(self.buffered_bytes());
                for chunk in self.chunks.drain(..) {
                    all.extend_from_slice(&chunk);
                }
                all.freeze()
            }
        }
    }

    /// Remove the oldest chunk.
    pub fn pop_chunk(&mut self) -> Option<Bytes> {
        self.chunks.pop_front()
    }

    /// Remove one line, `\n` consumed and every `\r` dropped.
    ///
    /// With `line_mode` the line may span chunks and nothing is returned
    /// until a newline has arrived. Without it only the oldest chunk is
    /// examined and its end counts as a line end.
    pub fn take_line(&mut self, line_mode: bool) -> Option<Bytes> {
        if line_mode {
            self.take_terminated_line()
        } else {
            self.take_chunk_line()
        }
    }

    fn take_terminated_line(&mut self) -> Option<Bytes> {
        let (index, pos) = self.chunks.iter().enumerate().find_map(|(i, chunk)| {
            chunk.iter().position(|&b| b == b'\n').map(|pos| (i, pos))
        })?;

        let mut line = BytesMut::new();
        for chunk in self.chunks.drain(..index) {
            extend_without_cr(&mut line, &chunk);
        }
        if let Some(chunk) = self.chunks.front_mut() {
            let head = chunk.split_to(pos + 1);
            extend_without_cr(&mut line, &head[..pos]);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
        }
        Some(line.freeze())
    }

    fn take_chunk_line(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.front_mut()?;
        let line = match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let head = chunk.split_to(pos + 1);
                without_cr(head.slice(..pos))
            }
            None => without_cr(std::mem::take(chunk)),
        };
        if chunk.is_empty() {
            self.chunks.pop_front();
        }
        Some(line)
    }
}

fn extend_without_cr(line: &mut BytesMut, bytes: &[u8]) {
    line.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
}

fn without_cr(bytes: Bytes) -> Bytes {
    if !bytes.contains(&b'\r') {
        return bytes;
    }
    let mut out = BytesMut::with_capacity(bytes.len());
    extend_without_cr(&mut out, &bytes);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbox(chunks: &[&'static [u8]]) -> Inbox {
        let mut inbox = Inbox::new();
        for chunk in chunks {
            inbox.push(Bytes::from_static(*chunk));
        }
        inbox
    }

    #[test]
    fn take_all_concatenates_in_order() {
        let mut inbox = inbox(&[b"ab", b"cd"]);
        assert_eq!(&inbox.take_all()[..], b"abcd");
        assert!(inbox.is_empty());
        assert!(inbox.take_all().is_empty());
    }

    #[test]
    fn line_mode_spans_chunks() {
        let mut inbox = inbox(&[b"he", b"llo\r\nwor"]);
        assert_eq!(&inbox.take_line(true).unwrap()[..], b"hello");
        assert_eq!(&inbox.take_all()[..], b"wor");
    }

    #[test]
    fn line_mode_leaves_later_chunks_alone() {
        let mut inbox = inbox(&[b"ab", b"cd\n", b"ef"]);
        assert_eq!(&inbox.take_line(true).unwrap()[..], b"abcd");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox.pop_chunk().unwrap(), Bytes::from_static(b"ef"));
    }

    #[test]
    fn line_mode_waits_for_newline() {
        let mut inbox = inbox(&[b"partial"]);
        assert!(inbox.take_line(true).is_none());
        assert_eq!(inbox.len(), 1);
        inbox.push(Bytes::from_static(b" line\n"));
        assert_eq!(&inbox.take_line(true).unwrap()[..], b"partial line");
        assert!(inbox.is_empty());
    }

    #[test]
    fn chunk_mode_keeps_remainder() {
        let mut inbox = inbox(&[b"a\nb"]);
        assert_eq!(&inbox.take_line(false).unwrap()[..], b"a");
        assert_eq!(&inbox.take_line(false).unwrap()[..], b"b");
        assert!(inbox.take_line(false).is_none());
    }

    #[test]
    fn chunk_mode_treats_chunk_end_as_terminator() {
        let mut inbox = inbox(&[b"no newline\r", b"next"]);
        assert_eq!(&inbox.take_line(false).unwrap()[..], b"no newline");
        assert_eq!(&inbox.take_line(false).unwrap()[..], b"next");
    }

    #[test]
    fn blank_lines_are_returned() {
        let mut inbox = inbox(&[b"\n\nx\n"]);
        assert_eq!(&inbox.take_line(true).unwrap()[..], b"");
        assert_eq!(&inbox.take_line(true).unwrap()[..], b"");
        assert_eq!(&inbox.take_line(true).unwrap()[..], b"x");
        assert!(inbox.take_line(true).is_none());
    }

    #[test]
    fn data_ready_is_test_and_clear() {
        let mut inbox = Inbox::new();
        assert!(!inbox.take_data_ready());
        inbox.push(Bytes::new());
        assert!(!inbox.take_data_ready());
        inbox.push(Bytes::from_static(b"x"));
        assert!(inbox.take_data_ready());
        assert!(!inbox.take_data_ready());
    }

    #[test]
    fn pop_chunk_preserves_boundaries() {
        let mut inbox = inbox(&[b"one", b"two"]);
        assert_eq!(inbox.pop_chunk().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(inbox.pop_chunk().unwrap(), Bytes::from_static(b"two"));
        assert!(inbox.pop_chunk().is_none());
    }
}
