use std::{future::poll_fn, pin::Pin};

use async_stream::try_stream;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::chunk::{Chunk, SharedBuffer};
use crate::pool::ChunkPool;
use crate::{ByteSourceError, Result};

fn check_buffer_size(buffer_size: usize) -> Result<()> {
    if buffer_size == 0 {
        return Err(ByteSourceError::InvalidArgument(
            "buffer size must be greater than zero".to_owned(),
        ));
    }
    Ok(())
}

/// Turns `reader` into a lazy sequence of owned chunks.
///
/// Nothing is rented or read until the stream is first polled. Every read
/// goes into one rented buffer and the bytes read are copied into a fresh
/// chunk, so emitted chunks stay valid forever. A read of zero bytes ends
/// the sequence; a read error is yielded once and ends it.
///
/// The buffer goes back to `pool` and the reader is dropped when the
/// sequence ends, fails, or is dropped by its consumer.
pub fn pull_chunks<R>(
    reader: R,
    buffer_size: usize,
    pool: ChunkPool,
) -> impl Stream<Item = Result<Chunk>> + Send + 'static
where
    R: AsyncRead + Send + Unpin + 'static,
{
    try_stream! {
        check_buffer_size(buffer_size)?;
        let mut reader = reader;
        let mut buffer = pool.rent(buffer_size);
        log::trace!("pull: started with {} byte buffer", buffer_size);

        let mut chunks = 0usize;
        loop {
            let read = reader.read(&mut buffer[..]).await?;
            if read == 0 {
                break;
            }
            chunks += 1;
            yield Chunk::owned(Bytes::copy_from_slice(&buffer[..read]));
        }
        log::trace!("pull: reached end of reader after {} chunks", chunks);
    }
}

/// Zero-copy variant of [`pull_chunks`].
///
/// Reads alternate between two rented buffers and each chunk is a
/// *borrowed* view of the buffer that was just filled. The buffer is
/// overwritten two reads later, so the consumer must be completely done
/// with a chunk before it polls for the one after next. Sequential
/// consumers that finish each chunk before asking for another satisfy
/// this; anything that keeps chunks around must copy them with
/// [`Chunk::to_owned_chunk`].
pub fn pull_chunks_zero_copy<R>(
    reader: R,
    buffer_size: usize,
    pool: ChunkPool,
) -> impl Stream<Item = Result<Chunk>> + Send + 'static
where
    R: AsyncRead + Send + Unpin + 'static,
{
    try_stream! {
        check_buffer_size(buffer_size)?;
        let mut reader = reader;
        let buffers = [
            SharedBuffer::new(pool.rent(buffer_size)),
            SharedBuffer::new(pool.rent(buffer_size)),
        ];
        log::trace!("pull: started zero-copy with 2x{} byte buffers", buffer_size);

        let mut current = 0;
        loop {
            let buffer = buffers[current].clone();
            let read = poll_fn(|cx| {
                buffer.poll_read_from(Pin::new(&mut reader), cx)
            })
            .await?;
            if read == 0 {
                break;
            }
            yield Chunk::borrowed(&buffer, read);
            current = 1 - current;
        }
    }
}
