//! Cold, replayable byte sources.
//!
//! A [`ByteSource`] only describes how to produce chunks. Building one never
//! opens a file, issues a request or encodes anything; every call to
//! [`ByteSource::bytes`] starts production over from scratch with fresh
//! resources.

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use async_stream::try_stream;
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use futures::{stream::BoxStream, Stream, StreamExt};
use tokio::io::AsyncRead;

use crate::{
    chunk::Chunk, config::ReadConfig, pool::ChunkPool, pull::pull_chunks,
    ByteSourceError, Result, DEFAULT_BUFFER_SIZE,
};

pub type ChunkStream = BoxStream<'static, Result<Chunk>>;

type Factory = Arc<dyn Fn() -> ChunkStream + Send + Sync>;

/// Splits `data` into owned chunks of `buffer_size` bytes; the last one
/// holds the remainder. The chunks share `data`'s memory.
pub fn chunk_bytes(
    data: impl Into<Bytes>,
    buffer_size: usize,
) -> Result<Vec<Chunk>> {
    if buffer_size == 0 {
        return Err(ByteSourceError::InvalidArgument(
            "buffer size must be greater than zero".to_owned(),
        ));
    }
    let data = data.into();
    let chunks = (0..data.len())
        .step_by(buffer_size)
        .map(|start| {
            let end = (start + buffer_size).min(data.len());
            Chunk::owned(data.slice(start..end))
        })
        .collect();
    Ok(chunks)
}

#[derive(Clone)]
pub struct ByteSource {
    factory: Factory,
    length: Option<u64>,
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl ByteSource {
    /// A source that runs `factory` once per consumption.
    pub fn new<F, S>(factory: F, length: Option<u64>) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Chunk>> + Send + 'static,
    {
        Self {
            factory: Arc::new(move || factory().boxed()),
            length,
        }
    }

    pub fn empty() -> Self {
        Self::new(futures::stream::empty::<Result<Chunk>>, Some(0))
    }

    /// A fresh chunk sequence. Each call replays production from the start.
    pub fn bytes(&self) -> ChunkStream {
        (self.factory)()
    }

    /// Total length, when it is known without consuming the source.
    pub fn len_hint(&self) -> Option<u64> {
        self.length
    }

    pub fn with_length(mut self, length: Option<u64>) -> Self {
        self.length = length;
        self
    }

    /// In-memory data split into chunks of `buffer_size` bytes. The chunks
    /// are owned and share `data`'s memory.
    pub fn from_bytes(data: impl Into<Bytes>, buffer_size: usize) -> Self {
        let data: Bytes = data.into();
        let length = data.len() as u64;
        Self::new(
            move || match chunk_bytes(data.clone(), buffer_size) {
                Ok(chunks) => {
                    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
                }
                Err(err) => {
                    futures::stream::once(async move { Err(err) }).boxed()
                }
            },
            Some(length),
        )
    }

    /// Chunks produced by `factory`, one new stream per consumption.
    pub fn from_chunk_stream<F, S, C>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<C>> + Send + 'static,
        C: Into<Chunk>,
    {
        Self::new(move || factory().map(|item| item.map(Into::into)), None)
    }

    /// Single bytes produced by `factory`, re-batched into chunks of
    /// `buffer_size` bytes.
    pub fn from_byte_stream<F, S>(factory: F, buffer_size: usize) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<u8>> + Send + 'static,
    {
        let factory = Arc::new(factory);
        Self::new(
            move || {
                let factory = factory.clone();
                try_stream! {
                    if buffer_size == 0 {
                        Err::<(), _>(ByteSourceError::InvalidArgument(
                            "buffer size must be greater than zero".to_owned(),
                        ))?;
                    }
                    let mut bytes = factory().boxed();
                    let mut batch = Vec::with_capacity(buffer_size);
                    while let Some(byte) = bytes.next().await {
                        batch.push(byte?);
                        if batch.len() == buffer_size {
                            let full = std::mem::replace(
                                &mut batch,
                                Vec::with_capacity(buffer_size),
                            );
                            yield Chunk::owned(full);
                        }
                    }
                    if !batch.is_empty() {
                        yield Chunk::owned(batch);
                    }
                }
            },
            None,
        )
    }

    /// Opens a reader with `factory` on every consumption and pulls it in
    /// chunks of `buffer_size` bytes.
    pub fn from_reader_factory<F, R>(factory: F, buffer_size: usize) -> Self
    where
        F: Fn() -> std::io::Result<R> + Send + Sync + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::from_async_reader_factory(
            move || futures::future::ready(factory()),
            buffer_size,
        )
    }

    /// Like [`ByteSource::from_reader_factory`] for readers that take an
    /// asynchronous step to open.
    pub fn from_async_reader_factory<F, Fut, R>(
        factory: F,
        buffer_size: usize,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::io::Result<R>> + Send + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let factory = Arc::new(factory);
        Self::new(
            move || {
                let factory = factory.clone();
                try_stream! {
                    let reader = factory().await?;
                    let mut chunks = Box::pin(pull_chunks(
                        reader,
                        buffer_size,
                        ChunkPool::shared().clone(),
                    ));
                    while let Some(chunk) = chunks.next().await {
                        yield chunk?;
                    }
                }
            },
            None,
        )
    }

    /// Wraps a reader that is already open.
    ///
    /// Only the first consumption gets the data; later ones fail with
    /// [`ByteSourceError::Consumed`].
    pub fn from_reader<R>(reader: R, buffer_size: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(reader)));
        Self::new(
            move || {
                let slot = slot.clone();
                try_stream! {
                    let taken =
                        slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    let reader = taken.ok_or(ByteSourceError::Consumed)?;
                    let mut chunks = Box::pin(pull_chunks(
                        reader,
                        buffer_size,
                        ChunkPool::shared().clone(),
                    ));
                    while let Some(chunk) = chunks.next().await {
                        yield chunk?;
                    }
                }
            },
            None,
        )
    }

    /// Wraps a chunk stream that can only be run once, like the body of a
    /// response. Later consumptions fail with [`ByteSourceError::Consumed`].
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Chunk>> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(stream.boxed())));
        Self::new(
            move || {
                let slot = slot.clone();
                try_stream! {
                    let taken =
                        slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    let mut chunks = taken.ok_or(ByteSourceError::Consumed)?;
                    while let Some(chunk) = chunks.next().await {
                        yield chunk?;
                    }
                }
            },
            None,
        )
    }

    /// The content of the file at `path`, read with the default buffer size.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::from_file_with(path, ReadConfig::default())
    }

    /// The content of the file at `path`, sliced as `config` says.
    pub fn from_file_with(
        path: impl Into<PathBuf>,
        config: ReadConfig,
    ) -> Self {
        let path: Arc<Path> = path.into().into();
        let buffer_size = config.buffer_size;
        Self::from_async_reader_factory(
            move || {
                let path = path.clone();
                async move {
                    log::trace!("source: opening {}", path.display());
                    tokio::fs::File::open(&*path).await
                }
            },
            buffer_size,
        )
    }

    /// `text` encoded with `encoding`.
    ///
    /// Encodings that cannot be produced (UTF-16) fall back to UTF-8, the
    /// way `encoding_rs` defines their output encoding.
    pub fn from_text(
        text: impl Into<String>,
        encoding: &'static Encoding,
        buffer_size: usize,
    ) -> Self {
        let text: Arc<str> = text.into().into();
        let length =
            (encoding.output_encoding() == UTF_8).then(|| text.len() as u64);
        Self::new(
            move || {
                let text = text.clone();
                try_stream! {
                    let (encoded, _, _) = encoding.encode(&text);
                    let data = Bytes::copy_from_slice(&encoded);
                    for chunk in chunk_bytes(data, buffer_size)? {
                        yield chunk;
                    }
                }
            },
            length,
        )
    }

    pub fn from_utf8(text: impl Into<String>) -> Self {
        Self::from_text(text, UTF_8, DEFAULT_BUFFER_SIZE)
    }

    /// Resource-scoped source.
    ///
    /// On every consumption `acquire` produces a resource and `derive`
    /// takes ownership of it to build the source whose chunks are emitted.
    /// The resource lives as long as the derived source and is dropped
    /// exactly once, when the sequence completes, fails, or is abandoned
    /// by its consumer. Acquisition and derivation failures end the
    /// sequence with [`ByteSourceError::Acquire`] and
    /// [`ByteSourceError::Transform`].
    pub fn from_resource<T, A, AF, D>(acquire: A, derive: D) -> Self
    where
        T: Send + 'static,
        A: Fn() -> AF + Send + Sync + 'static,
        AF: Future<Output = Result<T>> + Send + 'static,
        D: Fn(T) -> Result<ByteSource> + Send + Sync + 'static,
    {
        let derive = Arc::new(derive);
        Self::from_resource_async(acquire, move |resource| {
            futures::future::ready(derive(resource))
        })
    }

    /// [`ByteSource::from_resource`] with an asynchronous `derive` step.
    pub fn from_resource_async<T, A, AF, D, DF>(acquire: A, derive: D) -> Self
    where
        T: Send + 'static,
        A: Fn() -> AF + Send + Sync + 'static,
        AF: Future<Output = Result<T>> + Send + 'static,
        D: Fn(T) -> DF + Send + Sync + 'static,
        DF: Future<Output = Result<ByteSource>> + Send + 'static,
    {
        let acquire = Arc::new(acquire);
        let derive = Arc::new(derive);
        Self::new(
            move || {
                let acquire = acquire.clone();
                let derive = derive.clone();
                try_stream! {
                    let resource = acquire()
                        .await
                        .map_err(|err| ByteSourceError::Acquire(err.to_string()))?;
                    log::debug!("resource: acquired");

                    let derived = derive(resource)
                        .await
                        .map_err(|err| ByteSourceError::Transform(err.to_string()))?;
                    let mut chunks = derived.bytes();
                    while let Some(chunk) = chunks.next().await {
                        yield chunk?;
                    }
                    drop(chunks);
                    drop(derived);
                    log::debug!("resource: released");
                }
            },
            None,
        )
    }
}
