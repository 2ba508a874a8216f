//! Fixed-size overlapping text chunker.
//!
//! Splits text into [`ChunkInfo`] spans of `chunk_size` characters, each
//! starting `chunk_size - overlap` characters after the previous one. Offsets
//! count Unicode scalar values, not bytes, and are half-open.
//!
//! Two variants produce identical output:
//! - [`chunk_text`] works on a whole string in memory.
//! - [`StreamingChunker`] reads from any [`Read`] through a bounded character
//!   buffer, so large files never have to be decoded in full.
//!
//! # Guarantees
//!
//! - Empty input yields no chunks.
//! - Input shorter than `chunk_size` yields exactly one chunk.
//! - The final chunk may be shorter than `chunk_size` and is always emitted.
//! - Concatenating each chunk's first `step` characters (and the whole of the
//!   last chunk) reproduces the input exactly.
//!
//! # Example
//!
//! ```rust
//! use context_rag::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(4, 1).unwrap();
//! let chunks = chunk_text("abcdefghij", params);
//! let spans: Vec<_> = chunks.iter().map(|c| c.content.as_str()).collect();
//! assert_eq!(spans, vec!["abcd", "defg", "ghij"]);
//! ```

use std::io::{ErrorKind, Read};

use crate::error::{RagError, Result};
use crate::models::ChunkInfo;

/// Approximate chars-per-token ratio used for `token_count` estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Bytes requested from the reader per refill, before the buffer bound.
const READ_BLOCK: usize = 8 * 1024;

/// Validated chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// Requires `chunk_size > 0` and `overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidInput("chunk_size must be > 0".into()));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidInput(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive chunk starts.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Rough token estimate for a chunk of `chars` characters.
pub fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Split an in-memory string into overlapping chunks.
pub fn chunk_text(text: &str, params: ChunkParams) -> Vec<ChunkInfo> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = (start + params.chunk_size).min(chars.len());
        chunks.push(ChunkInfo {
            content: chars[start..end].iter().collect(),
            start_char: start,
            end_char: end,
            chunk_index: chunks.len(),
        });
        if end == chars.len() {
            break;
        }
        start += params.step();
    }

    chunks
}

/// Incremental chunker over a byte stream.
///
/// Decodes UTF-8 on the fly (invalid sequences become `U+FFFD`, exactly as
/// [`String::from_utf8_lossy`] would) into a window of at most `capacity`
/// characters. The window slides forward by `step` characters per emitted
/// chunk and is compacted once more than half of it has been consumed.
pub struct StreamingChunker<R: Read> {
    reader: R,
    params: ChunkParams,
    capacity: usize,
    buffer: Vec<char>,
    /// Absolute character offset of `buffer[0]`.
    buffer_start: usize,
    /// Index into `buffer` where the next chunk starts.
    pos: usize,
    /// Undecoded bytes, at most one incomplete UTF-8 sequence.
    pending: Vec<u8>,
    eof: bool,
    done: bool,
    next_index: usize,
}

impl<R: Read> StreamingChunker<R> {
    /// Create a chunker with the minimum buffer size.
    pub fn new(reader: R, params: ChunkParams) -> Self {
        Self::with_capacity(reader, params, 0)
    }

    /// Create a chunker with a buffer of `capacity` characters. Values below
    /// `2 × chunk_size + 2` are raised to that minimum.
    pub fn with_capacity(reader: R, params: ChunkParams, capacity: usize) -> Self {
        let capacity = capacity.max(2 * params.chunk_size + 2);
        Self {
            reader,
            params,
            capacity,
            buffer: Vec::with_capacity(capacity),
            buffer_start: 0,
            pos: 0,
            pending: Vec::new(),
            eof: false,
            done: false,
            next_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn compact(&mut self) {
        if self.pos > self.capacity / 2 {
            self.buffer.drain(..self.pos);
            self.buffer_start += self.pos;
            self.pos = 0;
        }
    }

    /// Make sure at least `chunk_size + 1` characters sit past `pos`, or the
    /// stream is exhausted. The extra character tells a full final chunk
    /// apart from one that has more text after it.
    fn fill(&mut self) -> std::io::Result<()> {
        while !self.eof && self.buffer.len() - self.pos <= self.params.chunk_size {
            let room = self.capacity - self.buffer.len();
            let mut block = vec![0u8; room.min(READ_BLOCK)];
            let n = match self.reader.read(&mut block) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                self.eof = true;
                if !self.pending.is_empty() {
                    // Truncated multi-byte sequence at end of stream.
                    self.pending.clear();
                    self.buffer.push(char::REPLACEMENT_CHARACTER);
                }
                break;
            }
            self.pending.extend_from_slice(&block[..n]);
            self.decode_pending();
        }
        Ok(())
    }

    fn decode_pending(&mut self) {
        let mut consumed = 0usize;
        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    self.buffer.extend(s.chars());
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // from_utf8 guarantees the prefix is valid.
                    if let Ok(s) = std::str::from_utf8(&rest[..valid]) {
                        self.buffer.extend(s.chars());
                    }
                    match e.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                        None => {
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    fn next_chunk(&mut self) -> std::io::Result<Option<ChunkInfo>> {
        if self.done {
            return Ok(None);
        }

        self.compact();
        self.fill()?;

        let available = self.buffer.len() - self.pos;
        if available == 0 {
            self.done = true;
            return Ok(None);
        }

        let len = available.min(self.params.chunk_size);
        let end = self.pos + len;
        let chunk = ChunkInfo {
            content: self.buffer[self.pos..end].iter().collect(),
            start_char: self.buffer_start + self.pos,
            end_char: self.buffer_start + end,
            chunk_index: self.next_index,
        };
        self.next_index += 1;

        if self.eof && end == self.buffer.len() {
            self.done = true;
        } else {
            self.pos += self.params.step();
        }

        Ok(Some(chunk))
    }
}

impl<R: Read> Iterator for StreamingChunker<R> {
    type Item = std::io::Result<ChunkInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that hands out at most `max` bytes per call, to exercise
    /// multi-byte sequences split across reads.
    struct Trickle<'a> {
        data: &'a [u8],
        max: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.data.len().min(self.max).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn params(size: usize, overlap: usize) -> ChunkParams {
        ChunkParams::new(size, overlap).unwrap()
    }

    fn streamed(bytes: &[u8], p: ChunkParams) -> Vec<ChunkInfo> {
        StreamingChunker::new(bytes, p)
            .collect::<std::io::Result<Vec<_>>>()
            .unwrap()
    }

    fn reconstruct(chunks: &[ChunkInfo], p: ChunkParams) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i + 1 == chunks.len() {
                out.push_str(&c.content);
            } else {
                out.extend(c.content.chars().take(p.step()));
            }
        }
        out
    }

    #[test]
    fn test_invalid_params() {
        assert!(ChunkParams::new(0, 0).is_err());
        assert!(ChunkParams::new(10, 10).is_err());
        assert!(ChunkParams::new(10, 11).is_err());
        assert!(ChunkParams::new(10, 9).is_ok());
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", params(10, 2)).is_empty());
        assert!(streamed(b"", params(10, 2)).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello", params(20, 5));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello");
        assert_eq!((chunks[0].start_char, chunks[0].end_char), (0, 5));
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_overlap_chunk() {
        let chunks = chunk_text("abcdefgh", params(4, 0));
        assert_eq!(chunks.len(), 2);
        let chunks = chunk_text("abcd", params(4, 2));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_final_chunk_shorter() {
        let chunks = chunk_text(&"x".repeat(25), params(10, 2));
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_char).collect();
        assert_eq!(starts, vec![0, 8, 16]);
        assert_eq!(chunks[2].end_char, 25);
        assert_eq!(chunks[2].content.len(), 9);
    }

    #[test]
    fn test_overlap_between_consecutive_chunks() {
        let text: String = (0..200).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let p = params(30, 7);
        let chunks = chunk_text(&text, p);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_char, pair[0].start_char + p.step());
            assert_eq!(pair[1].chunk_index, pair[0].chunk_index + 1);
            if pair[1].end_char - pair[1].start_char == p.chunk_size() {
                let tail: String = pair[0].content.chars().skip(p.step()).collect();
                let head: String = pair[1].content.chars().take(p.overlap()).collect();
                assert_eq!(tail, head);
            }
        }
    }

    #[test]
    fn test_reconstructs_original() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(13);
        for (size, overlap) in [(1, 0), (7, 3), (16, 0), (50, 49), (1000, 10)] {
            let p = params(size, overlap);
            assert_eq!(reconstruct(&chunk_text(&text, p), p), text);
            assert_eq!(reconstruct(&streamed(text.as_bytes(), p), p), text);
        }
    }

    #[test]
    fn test_offsets_are_character_based() {
        let text = "héllo wörld ✓✓✓";
        let chunks = chunk_text(text, params(5, 1));
        for c in &chunks {
            assert_eq!(c.content.chars().count(), c.end_char - c.start_char);
            let expected: String = text
                .chars()
                .skip(c.start_char)
                .take(c.end_char - c.start_char)
                .collect();
            assert_eq!(c.content, expected);
        }
    }

    #[test]
    fn test_streaming_matches_eager() {
        let text = "Ünïcödé ✓ text with 日本語 and emoji 🚀 sprinkled in. ".repeat(40);
        for (size, overlap) in [(3, 1), (10, 0), (64, 16), (100, 99), (5000, 100)] {
            let p = params(size, overlap);
            let eager = chunk_text(&text, p);
            let stream = streamed(text.as_bytes(), p);
            assert_eq!(eager, stream, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn test_streaming_with_split_multibyte_reads() {
        let text = "日本語のテキスト🚀".repeat(30);
        let p = params(7, 2);
        let reader = Trickle {
            data: text.as_bytes(),
            max: 1,
        };
        let stream: Vec<ChunkInfo> = StreamingChunker::new(reader, p)
            .collect::<std::io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(stream, chunk_text(&text, p));
    }

    #[test]
    fn test_streaming_invalid_utf8_matches_lossy() {
        let mut bytes = b"valid start ".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(" middle ".as_bytes());
        bytes.extend_from_slice(&[0xe6, 0x97]); // truncated 3-byte sequence
        let p = params(4, 1);
        let lossy = String::from_utf8_lossy(&bytes).into_owned();
        assert_eq!(streamed(&bytes, p), chunk_text(&lossy, p));
    }

    #[test]
    fn test_streaming_buffer_stays_bounded() {
        let text = "a".repeat(10_000);
        let p = params(10, 3);
        let mut chunker = StreamingChunker::new(text.as_bytes(), p);
        assert_eq!(chunker.capacity(), 22);
        let mut count = 0;
        while let Some(chunk) = chunker.next() {
            chunk.unwrap();
            assert!(chunker.buffer.len() <= chunker.capacity());
            count += 1;
        }
        assert_eq!(count, chunk_text(&text, p).len());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
    }
}
