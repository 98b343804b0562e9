//! Draining byte sources into destinations.
//!
//! Writes are strictly sequential: a chunk is requested only after the
//! previous one has been accepted by the destination. What happens to a
//! chunk between the source and the destination is decided by a
//! [`WriteStrategy`], picked from [`CopyMode`].

use std::path::Path;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    cancel::Cancellation,
    chunk::Chunk,
    config::{CopyMode, WriteOptions},
    source::{ByteSource, ChunkStream},
    ByteSourceError, Result,
};

/// What a write strategy does to each chunk before it is written.
pub trait WriteStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn prepare(&self, chunk: Chunk) -> Chunk;
}

/// Hands chunks to the destination untouched.
///
/// Only correct when the producer leaves a chunk's memory alone until its
/// write has completed. A producer of borrowed chunks that reuses its
/// buffer early corrupts the output; nothing checks this at runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroCopy;

impl WriteStrategy for ZeroCopy {
    fn name(&self) -> &'static str {
        "zero-copy"
    }

    fn prepare(&self, chunk: Chunk) -> Chunk {
        chunk
    }
}

/// Copies every chunk before it is written, so the destination always
/// gets the bytes as they were when the chunk was emitted.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefensiveCopy;

impl WriteStrategy for DefensiveCopy {
    fn name(&self) -> &'static str {
        "defensive-copy"
    }

    fn prepare(&self, chunk: Chunk) -> Chunk {
        chunk.to_owned_chunk()
    }
}

impl CopyMode {
    pub fn strategy(self) -> &'static dyn WriteStrategy {
        match self {
            CopyMode::ZeroCopy => &ZeroCopy,
            CopyMode::DefensiveCopy => &DefensiveCopy,
        }
    }
}

/// Progress of a chunked write: one item per chunk accepted by the
/// destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkWritten {
    pub index: usize,
    pub len: usize,
}

/// Result of a whole write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub chunks: usize,
    pub bytes: u64,
    /// The write stopped early because it was cancelled. This is not a
    /// failure; see [`WriteSummary::into_cancellation_error`].
    pub cancelled: bool,
}

impl WriteSummary {
    /// Turns a cancelled write into [`ByteSourceError::Cancelled`] for
    /// callers that want to treat it as one.
    pub fn into_cancellation_error(self) -> Result<Self> {
        if self.cancelled {
            Err(ByteSourceError::Cancelled)
        } else {
            Ok(self)
        }
    }
}

enum Step {
    Chunk(Chunk),
    End,
    Cancelled,
}

struct WriteLoop<'a, W: ?Sized> {
    chunks: ChunkStream,
    dest: &'a mut W,
    options: WriteOptions,
    strategy: &'static dyn WriteStrategy,
    summary: WriteSummary,
    finished: bool,
}

impl<'a, W> WriteLoop<'a, W>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    fn new(source: &ByteSource, dest: &'a mut W, options: WriteOptions) -> Self {
        let strategy = options.copy_mode.strategy();
        Self {
            chunks: source.bytes(),
            dest,
            options,
            strategy,
            summary: WriteSummary::default(),
            finished: false,
        }
    }

    async fn next_chunk(&mut self) -> Result<Step> {
        let cancellation = &self.options.cancellation;
        if cancellation.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        let chunks = &mut self.chunks;
        let timeout = self.options.chunk_read_timeout;
        let next = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, chunks.next())
                    .await
                    .map_err(|_| ByteSourceError::Timeout),
                None => Ok(chunks.next().await),
            }
        };

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Ok(Step::Cancelled),
            next = next => match next? {
                Some(chunk) => Ok(Step::Chunk(chunk?)),
                None => Ok(Step::End),
            },
        }
    }

    async fn write_chunk(
        dest: &mut W,
        chunk: &Chunk,
        cancellation: &Cancellation,
    ) -> Result<bool> {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Ok(false),
            written = chunk.write_all_to(dest) => {
                written?;
                Ok(true)
            }
        }
    }

    /// Moves one chunk from the source to the destination. `None` once the
    /// source is exhausted or the write was cancelled.
    async fn step(&mut self) -> Result<Option<ChunkWritten>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.step_inner().await;
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    async fn step_inner(&mut self) -> Result<Option<ChunkWritten>> {
        let chunk = match self.next_chunk().await {
            Ok(Step::Chunk(chunk)) => self.strategy.prepare(chunk),
            Ok(Step::End) => {
                self.dest.flush().await?;
                return Ok(None);
            }
            Ok(Step::Cancelled) => {
                log::debug!(
                    "sink: cancelled after {} chunks",
                    self.summary.chunks
                );
                self.summary.cancelled = true;
                self.dest.flush().await?;
                return Ok(None);
            }
            Err(ByteSourceError::Timeout) => {
                log::warn!(
                    "sink: source stalled after {} chunks",
                    self.summary.chunks
                );
                return Err(ByteSourceError::Timeout);
            }
            Err(err) => return Err(err),
        };

        let accepted = Self::write_chunk(
            &mut *self.dest,
            &chunk,
            &self.options.cancellation,
        )
        .await?;
        if !accepted {
            log::debug!("sink: cancelled while writing");
            self.summary.cancelled = true;
            self.dest.flush().await?;
            return Ok(None);
        }

        let written = ChunkWritten {
            index: self.summary.chunks,
            len: chunk.len(),
        };
        self.summary.chunks += 1;
        self.summary.bytes += chunk.len() as u64;
        Ok(Some(written))
    }
}

impl ByteSource {
    /// Writes the source into `dest`, reporting every chunk as it lands.
    ///
    /// The sequence ends after the last chunk, after a cancellation, or
    /// right after the first failure, which is its last item.
    pub fn write_to_chunked<'a, W>(
        &'a self,
        dest: &'a mut W,
        options: WriteOptions,
    ) -> impl Stream<Item = Result<ChunkWritten>> + Send + 'a
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        try_stream! {
            let mut writer = WriteLoop::new(self, dest, options);
            while let Some(written) = writer.step().await? {
                yield written;
            }
        }
    }

    /// Writes the whole source into `dest`.
    ///
    /// An empty source succeeds without writing anything. The first
    /// failure stops the write and is returned as is.
    pub async fn write_to<W>(
        &self,
        dest: &mut W,
        options: WriteOptions,
    ) -> Result<WriteSummary>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mode = options.copy_mode;
        let mut writer = WriteLoop::new(self, dest, options);
        while writer.step().await?.is_some() {}

        let summary = writer.summary;
        log::debug!(
            "sink: wrote {} chunks ({} bytes) with {}",
            summary.chunks,
            summary.bytes,
            mode.strategy().name()
        );
        Ok(summary)
    }

    /// Writes the whole source into the file at `path`, creating missing
    /// parent directories first. An existing file is truncated.
    pub async fn write_to_path(
        &self,
        path: impl AsRef<Path>,
        options: WriteOptions,
    ) -> Result<WriteSummary> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                ByteSourceError::Path(format!(
                    "could not create {}: {}",
                    parent.display(),
                    err
                ))
            })?;
        }

        let mut file = tokio::fs::File::create(path).await?;
        let summary = self.write_to(&mut file, options).await?;
        file.sync_all().await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::{
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        task::{Context, Poll},
        time::Duration,
    };
    use tempdir::TempDir;

    /// Never accepts a byte, but counts flushes.
    struct StuckWriter {
        flushes: Arc<AtomicUsize>,
    }

    impl AsyncWrite for StuckWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn empty_source_succeeds() {
        let mut out = Vec::new();
        let summary = ByteSource::empty()
            .write_to(&mut out, WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary::default());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn chunked_write_reports_every_chunk() {
        let source = ByteSource::from_bytes(vec![3u8; 10], 4);
        let mut out = Vec::new();
        let progress: Vec<ChunkWritten> = source
            .write_to_chunked(&mut out, WriteOptions::defensive())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            progress,
            vec![
                ChunkWritten { index: 0, len: 4 },
                ChunkWritten { index: 1, len: 4 },
                ChunkWritten { index: 2, len: 2 },
            ]
        );
        assert_eq!(out, vec![3u8; 10]);
    }

    #[tokio::test]
    async fn chunked_write_ends_with_the_failure() {
        let source = ByteSource::from_chunk_stream(|| {
            futures::stream::iter(vec![
                Ok(Chunk::owned(vec![1u8, 2])),
                Err(ByteSourceError::other("Test error")),
                Ok(Chunk::owned(vec![3u8])),
            ])
        });
        let mut out = Vec::new();
        let items: Vec<Result<ChunkWritten>> = source
            .write_to_chunked(&mut out, WriteOptions::default())
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "Test error");
        assert_eq!(out, vec![1u8, 2]);
    }

    #[tokio::test]
    async fn cancelled_write_is_a_graceful_stop() {
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let mut out = Vec::new();
        let summary = ByteSource::from_bytes(vec![1u8; 8], 2)
            .write_to(
                &mut out,
                WriteOptions::default().with_cancellation(cancellation),
            )
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.chunks, 0);
        assert!(out.is_empty());
        assert!(matches!(
            summary.into_cancellation_error(),
            Err(ByteSourceError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn cancellation_during_a_chunk_write_still_flushes() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let mut dest = StuckWriter {
            flushes: flushes.clone(),
        };
        let cancellation = Cancellation::new();

        let trigger = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let summary = ByteSource::from_bytes(vec![1u8; 8], 4)
            .write_to(
                &mut dest,
                WriteOptions::default().with_cancellation(cancellation),
            )
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.chunks, 0);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stalled_source_times_out_in_both_modes() {
        for mode in [CopyMode::ZeroCopy, CopyMode::DefensiveCopy] {
            let source = ByteSource::from_chunk_stream(|| {
                futures::stream::iter(vec![Ok(Chunk::owned(vec![1u8]))])
                    .chain(futures::stream::pending())
            });
            let mut out = Vec::new();
            let error = source
                .write_to(
                    &mut out,
                    WriteOptions::default()
                        .with_copy_mode(mode)
                        .with_timeout(Duration::from_millis(50)),
                )
                .await
                .unwrap_err();
            assert_eq!(error.to_string(), "Timeout reading from source.");
            assert_eq!(out, vec![1u8]);
        }
    }

    #[tokio::test]
    async fn write_to_path_creates_directories() {
        let dir = TempDir::new("byte-source").unwrap();
        let path = dir.path().join("nested/deeper/out.bin");
        let summary = ByteSource::from_bytes(b"payload".to_vec(), 3)
            .write_to_path(&path, WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.bytes, 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }
}
