//! Chunked byte FIFO used for every session's inbound and outbound buffers
//! and for the server's console mirror.
//!
//! Bytes are stored in fixed-capacity chunks, each with its own read and
//! write cursor. A fully read chunk is discarded when a successor exists,
//! otherwise it is rewound so the queue keeps one chunk once allocated.

use std::collections::VecDeque;

/// Default chunk capacity in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

#[derive(Debug)]
struct Chunk {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    fn all_read(&self) -> bool {
        self.read == self.write
    }

    fn is_full(&self) -> bool {
        self.write >= self.buf.len()
    }

    fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}

/// Unbounded single-reader/single-writer byte queue built from chunks.
#[derive(Debug)]
pub struct ChunkedQueue {
    chunks: VecDeque<Chunk>,
    chunk_size: usize,
}

impl ChunkedQueue {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// A zero chunk size is bumped to one byte.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn write_byte(&mut self, b: u8) {
        let needs_chunk = self.chunks.back().is_none_or(Chunk::is_full);
        if needs_chunk {
            self.chunks.push_back(Chunk::new(self.chunk_size));
        }
        if let Some(tail) = self.chunks.back_mut() {
            tail.buf[tail.write] = b;
            tail.write += 1;
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// True while unread bytes remain.
    ///
    /// Only the head chunk is consulted: a drained head is always either
    /// discarded or rewound by `read_byte`, so unread bytes can never sit
    /// behind an empty head.
    pub fn has_waiting(&self) -> bool {
        self.chunks.front().is_some_and(|c| !c.all_read())
    }

    /// Next unread byte, or `None` when the queue is drained.
    pub fn read_byte(&mut self) -> Option<u8> {
        let head = self.chunks.front_mut()?;
        if head.all_read() {
            return None;
        }
        let b = head.buf[head.read];
        head.read += 1;
        if head.all_read() {
            if self.chunks.len() > 1 {
                self.chunks.pop_front();
            } else if let Some(only) = self.chunks.front_mut() {
                only.reset();
            }
        }
        Some(b)
    }

    /// Read up to `max` bytes into a fresh buffer.
    pub fn read_up_to(&mut self, max: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max.min(self.chunk_size));
        while out.len() < max {
            match self.read_byte() {
                Some(b) => out.push(b),
                None => break,
            }
        }
        out
    }

    /// Drain everything that is waiting.
    pub fn drain_all(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = self.read_byte() {
            out.push(b);
        }
        out
    }

    /// Discard all unread bytes, keeping at most one rewound chunk.
    pub fn clear(&mut self) {
        self.chunks.truncate(1);
        if let Some(only) = self.chunks.front_mut() {
            only.reset();
        }
    }

    #[cfg(test)]
    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl Default for ChunkedQueue {
    fn default() -> Self {
        Self::new()
    }
}
