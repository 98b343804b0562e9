use std::{
    ops::Deref,
    path::{Path, PathBuf},
};

use crate::{source::ByteSource, ByteSourceError, Result};

/// A byte source with a file-like identity.
#[derive(Clone, Debug)]
pub struct NamedByteSource {
    name: String,
    path: Option<PathBuf>,
    source: ByteSource,
}

impl NamedByteSource {
    pub fn new(name: impl Into<String>, source: ByteSource) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ByteSourceError::InvalidArgument(
                "name of a byte source cannot be empty".to_owned(),
            ));
        }
        Ok(Self {
            name,
            path: None,
            source,
        })
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The file at `path`, named after its file name. The file is not
    /// touched until the source is consumed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ByteSourceError::Path(format!(
                    "{} has no usable file name",
                    path.display()
                ))
            })?;
        Ok(Self::new(name, ByteSource::from_file(path))?.with_path(path))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn source(&self) -> &ByteSource {
        &self.source
    }

    pub fn into_source(self) -> ByteSource {
        self.source
    }
}

impl Deref for NamedByteSource {
    type Target = ByteSource;

    fn deref(&self) -> &ByteSource {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_names_are_rejected() {
        assert!(NamedByteSource::new("  ", ByteSource::empty()).is_err());
        let named = NamedByteSource::new("a.txt", ByteSource::empty()).unwrap();
        assert_eq!(named.name(), "a.txt");
        assert_eq!(named.path(), None);
    }

    #[test]
    fn file_sources_take_the_file_name() {
        let named = NamedByteSource::from_file("/tmp/some/report.pdf").unwrap();
        assert_eq!(named.name(), "report.pdf");
        assert_eq!(named.path(), Some(Path::new("/tmp/some/report.pdf")));

        assert!(matches!(
            NamedByteSource::from_file("/"),
            Err(ByteSourceError::Path(_))
        ));
    }
}
