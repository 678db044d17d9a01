/*!
 * Byte Streams
 * In-memory buffers used to record stdin and capture stdout/stderr
 */

use bytes::Bytes;
use parking_lot::Mutex;
use std::io::{self, Cursor, Seek, SeekFrom};
use std::sync::Arc;

/// Minimal stream contract the process runner buffers through
pub trait ByteStream: Send {
    /// Read up to `max_bytes` from the current position
    fn read(&mut self, max_bytes: usize) -> io::Result<Bytes>;

    /// Append `data`, returning the number of bytes written
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Move the read position
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// True when the read position is at the end of the data
    fn eof(&self) -> bool;

    /// Read everything from the current position
    fn read_to_end(&mut self) -> io::Result<Bytes> {
        let mut out = Vec::new();
        while !self.eof() {
            let chunk = self.read(8192)?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(out))
    }
}

/// Growable in-memory stream with an independent read cursor.
///
/// Writes always append; they never move the read cursor, so bytes that
/// have not been read yet stay readable in order.
#[derive(Debug, Default)]
pub struct MemoryStream {
    inner: Cursor<Vec<u8>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bytes ever written
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    /// Current read position
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Unread bytes, without advancing the cursor
    pub fn peek_remaining(&self) -> Bytes {
        let start = (self.inner.position() as usize).min(self.len());
        Bytes::copy_from_slice(&self.inner.get_ref()[start..])
    }

    /// Every byte written so far, regardless of the cursor
    pub fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(self.inner.get_ref())
    }
}

impl ByteStream for MemoryStream {
    fn read(&mut self, max_bytes: usize) -> io::Result<Bytes> {
        let len = self.len();
        let start = (self.inner.position() as usize).min(len);
        let end = start.saturating_add(max_bytes).min(len);
        let chunk = Bytes::copy_from_slice(&self.inner.get_ref()[start..end]);
        self.inner.set_position(end as u64);
        Ok(chunk)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.inner.get_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    fn eof(&self) -> bool {
        self.inner.position() as usize >= self.len()
    }
}

/// Stream shared between a running process and its result
pub type SharedStream = Arc<Mutex<MemoryStream>>;

/// Create an empty shared stream
pub fn shared_stream() -> SharedStream {
    Arc::new(Mutex::new(MemoryStream::new()))
}
