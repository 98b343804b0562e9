//! Materializing sources into self-deleting temporary files.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use async_stream::try_stream;
use futures::StreamExt;

use crate::{
    config::WriteOptions, named::NamedByteSource, pool::ChunkPool,
    pull::pull_chunks, source::ByteSource, ByteSourceError, Result,
    DEFAULT_BUFFER_SIZE,
};

const DEFAULT_NAME_HINT: &str = "detached";

/// `{stem}-{random id}{extension}` for `name_hint`. The extension starts at
/// the last dot of the file name, so `.env` has an empty stem.
pub fn unique_temp_name(name_hint: Option<&str>) -> String {
    let hint = name_hint
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
        .unwrap_or(DEFAULT_NAME_HINT);
    let file_name = Path::new(hint)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_NAME_HINT.to_owned());
    let (stem, extension) = match file_name.rfind('.') {
        Some(dot) if dot + 1 < file_name.len() => file_name.split_at(dot),
        Some(dot) => (&file_name[..dot], ""),
        None => (file_name.as_str(), ""),
    };
    format!("{}-{}{}", stem, uuid::Uuid::new_v4().simple(), extension)
}

/// A temporary file removed once its last reader closes, or when nothing
/// refers to it any more.
#[derive(Debug)]
struct TempFile {
    path: PathBuf,
    state: Mutex<TempState>,
}

#[derive(Debug, Default)]
struct TempState {
    readers: usize,
    deleted: bool,
}

struct OpenReader {
    file: Arc<TempFile>,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(TempState::default()),
        }
    }

    fn open(file: &Arc<TempFile>) -> Result<OpenReader> {
        let mut state = file.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.deleted {
            return Err(ByteSourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} was deleted after it was read", file.path.display()),
            )));
        }
        state.readers += 1;
        Ok(OpenReader { file: file.clone() })
    }

    fn delete(&self, state: &mut TempState) {
        if state.deleted {
            return;
        }
        state.deleted = true;
        // called from `Drop`, possibly on a runtime thread: one blocking
        // unlink, nothing else
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("detach: deleted {}", self.path.display()),
            Err(err) => log::warn!(
                "detach: could not delete {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

impl Drop for OpenReader {
    fn drop(&mut self) {
        let mut state = self
            .file
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.file.delete(&mut state);
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut state = std::mem::take(state);
        self.delete(&mut state);
    }
}

fn temp_file_source(file: Arc<TempFile>, length: u64) -> ByteSource {
    ByteSource::new(
        move || {
            let file = file.clone();
            try_stream! {
                let reader = TempFile::open(&file)?;
                let handle = tokio::fs::File::open(&file.path).await?;
                let mut chunks = Box::pin(pull_chunks(
                    handle,
                    DEFAULT_BUFFER_SIZE,
                    ChunkPool::shared().clone(),
                ));
                while let Some(chunk) = chunks.next().await {
                    yield chunk?;
                }
                // the handle has to be closed before the file goes away
                drop(chunks);
                drop(reader);
            }
        },
        Some(length),
    )
}

/// Writes `source` into a fresh temporary file and returns a source
/// reading it back, named after the temporary file.
///
/// The file is deleted when the first complete or abandoned read closes
/// it (concurrent readers keep it alive until the last one closes), or
/// when the returned source is dropped without having been read. A failed
/// write leaves no file behind.
pub async fn materialize(
    source: &ByteSource,
    name_hint: Option<&str>,
) -> Result<NamedByteSource> {
    let name = unique_temp_name(name_hint);
    let path = std::env::temp_dir().join(&name);

    let summary = match source.write_to_path(&path, WriteOptions::default()).await
    {
        Ok(summary) => summary,
        Err(err) => {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                log::trace!(
                    "detach: nothing to clean up at {}: {}",
                    path.display(),
                    cleanup
                );
            }
            return Err(err);
        }
    };
    log::debug!(
        "detach: materialized {} bytes into {}",
        summary.bytes,
        path.display()
    );

    let file = Arc::new(TempFile::new(path.clone()));
    Ok(NamedByteSource::new(name, temp_file_source(file, summary.bytes))?
        .with_path(path))
}

/// [`materialize`] without the name.
pub async fn detach(
    source: &ByteSource,
    name_hint: Option<&str>,
) -> Result<ByteSource> {
    Ok(materialize(source, name_hint).await?.into_source())
}

impl NamedByteSource {
    /// Materializes this source; the result keeps this name and points at
    /// the temporary file.
    pub async fn detach(&self) -> Result<NamedByteSource> {
        let detached = materialize(self.source(), Some(self.name())).await?;
        let path = detached.path().map(Path::to_path_buf);
        let mut renamed =
            NamedByteSource::new(self.name(), detached.into_source())?;
        if let Some(path) = path {
            renamed = renamed.with_path(path);
        }
        Ok(renamed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn unique_names_keep_stem_and_extension() {
        let name = unique_temp_name(Some("report.pdf"));
        assert!(name.starts_with("report-"));
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), "report-".len() + 32 + ".pdf".len());
        assert_ne!(name, unique_temp_name(Some("report.pdf")));

        assert!(unique_temp_name(None).starts_with("detached-"));
        assert!(unique_temp_name(Some("   ")).starts_with("detached-"));
        let bare = unique_temp_name(Some("README"));
        assert!(bare.starts_with("README-") && !bare.contains('.'));
    }

    #[test]
    fn unique_names_split_at_the_last_dot() {
        let dotfile = unique_temp_name(Some(".env"));
        assert!(dotfile.starts_with('-'));
        assert!(dotfile.ends_with(".env"));
        assert_eq!(dotfile.len(), 1 + 32 + ".env".len());

        let nested = unique_temp_name(Some("dir/archive.tar.gz"));
        assert!(nested.starts_with("archive.tar-"));
        assert!(nested.ends_with(".gz"));

        let trailing = unique_temp_name(Some("odd."));
        assert!(trailing.starts_with("odd-") && !trailing.contains('.'));
    }

    #[tokio::test]
    async fn unread_detached_source_cleans_up_on_drop() {
        let detached = materialize(&ByteSource::from_utf8("abc"), Some("a.txt"))
            .await
            .unwrap();
        let path = detached.path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(detached);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn abandoned_read_deletes_the_file() {
        let data = vec![9u8; 3 * DEFAULT_BUFFER_SIZE];
        let detached = materialize(&ByteSource::from_bytes(data, 1024), None)
            .await
            .unwrap();
        let path = detached.path().unwrap().to_path_buf();

        let mut chunks = detached.bytes();
        assert!(chunks.try_next().await.unwrap().is_some());
        assert!(path.exists());
        drop(chunks);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_behind() {
        let failing = ByteSource::from_chunk_stream(|| {
            futures::stream::iter(vec![
                Ok(crate::Chunk::owned(vec![1u8])),
                Err(ByteSourceError::other("upstream broke")),
            ])
        });
        let error = detach(&failing, Some("broken.bin")).await.unwrap_err();
        assert!(error.to_string().contains("upstream broke"));

        let leftovers = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_name().to_string_lossy().starts_with("broken-")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn named_detach_keeps_the_name() {
        let named =
            NamedByteSource::new("notes.md", ByteSource::from_utf8("# hi"))
                .unwrap();
        let detached = named.detach().await.unwrap();
        assert_eq!(detached.name(), "notes.md");
        let path = detached.path().unwrap().to_path_buf();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("notes-"));
        assert_eq!(detached.read_all_text().await.unwrap(), "# hi");
        assert!(!path.exists());
    }
}
