//! Chunks handed out by byte sources.
//!
//! A [`Chunk`] is either *owned* or *borrowed*:
//!
//! - owned chunks wrap immutable [`Bytes`]; nobody can change them after
//!   they have been emitted.
//! - borrowed chunks alias a [`SharedBuffer`] that the producer keeps and may
//!   overwrite as soon as it is resumed. They are only valid until the next
//!   chunk is requested.
//!
//! Consumers that cannot finish with a chunk before asking for the next one
//! must take a copy with [`Chunk::to_owned_chunk`].

use std::{
    future::poll_fn,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::pool::PooledBuffer;

/// Memory shared between a producer and the chunks it lends out.
///
/// Cloning is cheap and yields another handle to the same bytes. When the
/// last handle is dropped a pooled buffer goes back to its pool.
#[derive(Clone, Debug)]
pub struct SharedBuffer {
    inner: Arc<RwLock<PooledBuffer>>,
}

impl SharedBuffer {
    pub fn new(buffer: PooledBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(buffer)),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the buffer for reading. Never hold the guard across an await.
    pub fn read(&self) -> RwLockReadGuard<'_, PooledBuffer> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the buffer for writing. Never hold the guard across an await.
    pub fn write(&self) -> RwLockWriteGuard<'_, PooledBuffer> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrites every byte of the buffer with `value`.
    pub fn fill(&self, value: u8) {
        self.write().fill(value);
    }

    /// Polls `reader` straight into the buffer, returning the bytes read.
    pub(crate) fn poll_read_from<R>(
        &self,
        reader: Pin<&mut R>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<usize>>
    where
        R: AsyncRead + ?Sized,
    {
        let mut guard = self.write();
        let mut read_buf = ReadBuf::new(&mut guard[..]);
        match reader.poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl From<Vec<u8>> for SharedBuffer {
    fn from(value: Vec<u8>) -> Self {
        Self::new(PooledBuffer::detached(value))
    }
}

#[derive(Clone, Debug)]
enum Repr {
    Owned(Bytes),
    Borrowed { buffer: SharedBuffer, len: usize },
}

/// One block of bytes emitted by a byte source.
#[derive(Clone, Debug)]
pub struct Chunk {
    repr: Repr,
}

impl Chunk {
    pub fn owned(bytes: impl Into<Bytes>) -> Self {
        Self {
            repr: Repr::Owned(bytes.into()),
        }
    }

    /// A chunk aliasing the first `len` bytes of `buffer`.
    ///
    /// `len` is clamped to the buffer length.
    pub fn borrowed(buffer: &SharedBuffer, len: usize) -> Self {
        let len = len.min(buffer.len());
        Self {
            repr: Repr::Borrowed {
                buffer: buffer.clone(),
                len,
            },
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Owned(bytes) => bytes.len(),
            Repr::Borrowed { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.repr, Repr::Borrowed { .. })
    }

    /// Runs `f` over the current content of the chunk.
    pub fn with_slice<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        match &self.repr {
            Repr::Owned(bytes) => f(bytes.as_ref()),
            Repr::Borrowed { buffer, len } => f(&buffer.read()[..*len]),
        }
    }

    /// The content as owned bytes. Owned chunks are shared, borrowed ones
    /// are copied out of the producer's buffer.
    pub fn to_bytes(&self) -> Bytes {
        match &self.repr {
            Repr::Owned(bytes) => bytes.clone(),
            Repr::Borrowed { .. } => {
                self.with_slice(Bytes::copy_from_slice)
            }
        }
    }

    /// A chunk that no producer can mutate any more.
    pub fn to_owned_chunk(&self) -> Chunk {
        Chunk::owned(self.to_bytes())
    }

    /// Writes the whole chunk to `dest`.
    ///
    /// Borrowed chunks are read from the producer's buffer on every poll, so
    /// the destination sees whatever the buffer holds when it accepts the
    /// bytes.
    pub async fn write_all_to<W>(&self, dest: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let total = self.len();
        let mut written = 0;
        while written < total {
            let n = poll_fn(|cx| {
                self.with_slice(|slice| {
                    Pin::new(&mut *dest).poll_write(cx, &slice[written..total])
                })
            })
            .await?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            written += n;
        }
        Ok(())
    }
}

impl From<Bytes> for Chunk {
    fn from(value: Bytes) -> Self {
        Chunk::owned(value)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(value: Vec<u8>) -> Self {
        Chunk::owned(value)
    }
}

impl PartialEq<[u8]> for Chunk {
    fn eq(&self, other: &[u8]) -> bool {
        self.with_slice(|slice| slice == other)
    }
}
