//! Buffer handle

use std::fmt;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustix::io::Errno;

use super::store::BackingStore;
use super::transmit::send_chunk;
use crate::error::BufferError;

/// Shared backing file and its logical length
struct Inner {
    fd: OwnedFd,
    len: AtomicU64,
}

/// Cursor-addressed handle to an anonymous backing file
///
/// Reads and writes are positional at this handle's own cursor, so
/// duplicates never disturb each other.
pub struct Buffer {
    inner: Arc<Inner>,
    position: u64,
}

impl Buffer {
    /// Create an empty buffer in kernel anonymous memory
    pub fn new() -> Result<Self, BufferError> {
        Self::new_in(&BackingStore::default())
    }

    /// Create an empty buffer in the given backing store
    pub fn new_in(store: &BackingStore) -> Result<Self, BufferError> {
        let fd = store.create().map_err(|e| {
            tracing::error!(error = %e, store = ?store, "Failed to allocate buffer");
            BufferError::Allocation(e)
        })?;

        Ok(Self {
            inner: Arc::new(Inner {
                fd,
                len: AtomicU64::new(0),
            }),
            position: 0,
        })
    }

    /// Create a buffer holding `data`, cursor rewound to 0
    pub fn from_slice(data: &[u8]) -> Result<Self, BufferError> {
        let mut buffer = Self::new()?;
        buffer.write(data);
        buffer.seek(0);
        Ok(buffer)
    }

    /// New handle onto the same content with its cursor at 0
    pub fn duplicate(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            position: 0,
        }
    }

    /// Write `data` at the cursor and advance it
    ///
    /// Best-effort: returns the number of bytes written, which is less than
    /// `data.len()` only if the backing store ran out of space.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let mut written = 0;

        while written < data.len() {
            let offset = self.position + written as u64;
            match rustix::io::pwrite(&self.inner.fd, &data[written..], offset) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(Errno::INTR) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, offset = offset, "Buffer write failed");
                    break;
                }
            }
        }

        if written < data.len() {
            tracing::warn!(
                requested = data.len(),
                written = written,
                "Short write to buffer"
            );
        }

        self.position += written as u64;
        self.inner.len.fetch_max(self.position, Ordering::AcqRel);
        written
    }

    /// Read up to `out.len()` bytes from the cursor and advance it
    ///
    /// Returns 0 at the end of content.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize, BufferError> {
        let remaining = self.size().saturating_sub(self.position);
        let want = out.len().min(remaining as usize);
        if want == 0 {
            return Ok(0);
        }

        loop {
            match rustix::io::pread(&self.inner.fd, &mut out[..want], self.position) {
                Ok(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Err(Errno::INTR) => continue,
                Err(e) => return Err(BufferError::Io(e.into())),
            }
        }
    }

    /// Move the cursor
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// Current cursor
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes written so far, across all handles
    pub fn size(&self) -> u64 {
        self.inner.len.load(Ordering::Acquire)
    }

    /// `true` if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of live handles sharing this content
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Copy the whole content out without moving the cursor
    pub fn to_vec(&self) -> Result<Vec<u8>, BufferError> {
        let mut data = vec![0u8; self.size() as usize];
        let mut filled = 0;

        while filled < data.len() {
            match rustix::io::pread(&self.inner.fd, &mut data[filled..], filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(Errno::INTR) => continue,
                Err(e) => return Err(BufferError::Io(e.into())),
            }
        }

        data.truncate(filled);
        Ok(data)
    }

    /// Send the full content to a blocking socket or file descriptor
    ///
    /// Uses `sendfile(2)` where available. Returns `true` only if every
    /// byte was transmitted; a partial transfer is logged and reported as
    /// failure, leaving the descriptor's state to the caller.
    pub fn transmit(&self, out: impl AsFd) -> bool {
        let size = self.size();
        let mut offset = 0u64;

        while offset < size {
            match send_chunk(&out, self.store_fd(), offset, (size - offset) as usize) {
                Ok(0) => break,
                Ok(n) => offset += n as u64,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, sent = offset, size = size, "Buffer transmit failed");
                    break;
                }
            }
        }

        if offset < size {
            tracing::warn!(sent = offset, size = size, "Partial buffer transmission");
            return false;
        }
        true
    }

    pub(crate) fn store_fd(&self) -> &OwnedFd {
        &self.inner.fd
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("position", &self.position)
            .field("handles", &self.handle_count())
            .finish()
    }
}
