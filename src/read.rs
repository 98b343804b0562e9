use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures::{io::AsyncRead, StreamExt, TryStreamExt};

use crate::{
    source::ByteSource, ByteSourceError, Result, DEFAULT_BUFFER_SIZE,
};

/// Upper bound on what a length hint may preallocate.
const MAX_PREALLOCATION: usize = 16 * DEFAULT_BUFFER_SIZE;

impl ByteSource {
    /// Collects the whole source into one buffer.
    ///
    /// The length hint only sizes the initial allocation, up to
    /// 16 default buffers; the buffer grows with the data.
    pub async fn read_all(&self) -> Result<Bytes> {
        let capacity = self
            .len_hint()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or_default()
            .min(MAX_PREALLOCATION);
        let mut out = BytesMut::with_capacity(capacity);

        let mut chunks = self.bytes();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            chunk.with_slice(|slice| out.extend_from_slice(slice));
        }
        Ok(out.freeze())
    }

    /// A reader over one fresh consumption of the source, for APIs that
    /// want to pull bytes themselves.
    ///
    /// Borrowed chunks are copied as they are read. A failure of the source
    /// surfaces as an `io::Error` carrying the [`ByteSourceError`].
    pub fn to_reader(&self) -> impl AsyncRead + Send + Unpin + 'static {
        self.bytes()
            .map(|chunk| {
                chunk.map(|chunk| chunk.to_bytes()).map_err(into_io_error)
            })
            .into_async_read()
    }

    /// The whole source decoded as UTF-8.
    pub async fn read_all_text(&self) -> Result<String> {
        self.read_all_text_with(UTF_8).await
    }

    /// The whole source decoded with `encoding`.
    ///
    /// A byte order mark at the start overrides `encoding` and is not part
    /// of the text. Malformed input fails with [`ByteSourceError::Decode`]
    /// instead of being replaced.
    pub async fn read_all_text_with(
        &self,
        encoding: &'static Encoding,
    ) -> Result<String> {
        let bytes = self.read_all().await?;
        decode_strict(&bytes, encoding)
    }
}

fn into_io_error(err: ByteSourceError) -> std::io::Error {
    match err {
        ByteSourceError::Io(err) => err,
        ByteSourceError::Timeout => std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            ByteSourceError::Timeout,
        ),
        other => std::io::Error::new(std::io::ErrorKind::Other, other),
    }
}

pub(crate) fn decode_strict(
    bytes: &[u8],
    encoding: &'static Encoding,
) -> Result<String> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((detected, bom_len)) => (detected, &bytes[bom_len..]),
        None => (encoding, bytes),
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
        .ok_or_else(|| ByteSourceError::Decode(encoding.name().to_owned()))
}
