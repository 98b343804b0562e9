//! Byte sources behind URIs.
//!
//! Providers only build sources; requests are issued when a source is
//! consumed, once per consumption, and bodies are streamed rather than
//! buffered.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use url::Url;

use crate::{chunk::Chunk, source::ByteSource, ByteSourceError, Result};

/// Something that can turn URIs of given schemes into byte sources.
pub trait UriContentProvider: Send + Sync {
    fn supports(&self, scheme: &str) -> bool;

    /// Must not perform any I/O.
    fn byte_source(&self, url: &Url) -> Result<ByteSource>;
}

/// Serves `file:` URIs from the local file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileContentProvider;

impl UriContentProvider for FileContentProvider {
    fn supports(&self, scheme: &str) -> bool {
        scheme == "file"
    }

    fn byte_source(&self, url: &Url) -> Result<ByteSource> {
        let path = url.to_file_path().map_err(|_| {
            ByteSourceError::InvalidUri(format!("{} is not a local path", url))
        })?;
        Ok(ByteSource::from_file(path))
    }
}

/// Serves `http:` and `https:` URIs with one streaming GET per consumption.
#[derive(Clone, Debug)]
pub struct HttpContentProvider {
    client: reqwest::Client,
}

impl HttpContentProvider {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "User-Agent",
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl UriContentProvider for HttpContentProvider {
    fn supports(&self, scheme: &str) -> bool {
        matches!(scheme, "http" | "https")
    }

    fn byte_source(&self, url: &Url) -> Result<ByteSource> {
        let client = self.client.clone();
        let url = url.clone();
        Ok(ByteSource::from_resource(
            move || {
                let request = client.get(url.clone());
                let url = url.clone();
                async move {
                    log::debug!("uri: GET {}", url);
                    let response = request.send().await?.error_for_status()?;
                    Ok::<_, ByteSourceError>(response)
                }
            },
            |response: reqwest::Response| {
                let length = response.content_length();
                let body = response.bytes_stream().map(|item| {
                    item.map(Chunk::owned).map_err(ByteSourceError::from)
                });
                Ok(ByteSource::from_stream(body).with_length(length))
            },
        ))
    }
}

/// Parses `uri` and asks `provider` for its source.
pub fn to_byte_source(
    uri: &str,
    provider: &dyn UriContentProvider,
) -> Result<ByteSource> {
    let url = Url::parse(uri)?;
    if !provider.supports(url.scheme()) {
        return Err(ByteSourceError::UnsupportedScheme(
            url.scheme().to_owned(),
        ));
    }
    provider.byte_source(&url)
}

/// A source for a `file:`, `http:` or `https:` URI.
pub fn from_uri(uri: &str) -> Result<ByteSource> {
    let url = Url::parse(uri)?;
    match url.scheme() {
        "file" => FileContentProvider.byte_source(&url),
        "http" | "https" => HttpContentProvider::new()?.byte_source(&url),
        other => Err(ByteSourceError::UnsupportedScheme(other.to_owned())),
    }
}
