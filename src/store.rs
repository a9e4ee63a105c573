use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::errors::{PdfSignError, PdfSignErrorKind, PdfSignResult};

/// Whole-content byte source and sink for a document.
pub trait DocumentStore {
    fn read_all(&self) -> Result<Vec<u8>, PdfSignError>;
    fn write_all(&self, content: &[u8]) -> Result<(), PdfSignError>;
}

/// A document on the local file system.
#[derive(Clone, Debug, PartialEq)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(self: &Self) -> &Path {
        &self.path
    }
}

impl DocumentStore for FileStore {
    fn read_all(&self) -> Result<Vec<u8>, PdfSignError> {
        fs::read(&self.path).map_err(|err| {
            PdfSignError::new(
                PdfSignErrorKind::IoError,
                format!("{}: {}", self.path.display(), err),
            )
        })
    }

    /// Replaces the file atomically, readers never see a partial document.
    fn write_all(&self, content: &[u8]) -> Result<(), PdfSignError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file =
            tempfile::NamedTempFile::new_in(parent).map_app_err(PdfSignErrorKind::IoError)?;
        file.write_all(content).map_app_err(PdfSignErrorKind::IoError)?;
        file.persist(&self.path)
            .map_err(|err| PdfSignError::new(PdfSignErrorKind::IoError, err.error.to_string()))?;

        Ok(())
    }
}
