use crate::SpecError;
use std::path::{Path, PathBuf};

/// Supplies the raw spec document.
#[cfg_attr(test, mockall::automock)]
pub trait SpecSource: Send + Sync {
    /// Where the document comes from, for log lines.
    fn describe(&self) -> String;

    fn read(&self) -> Result<Vec<u8>, SpecError>;
}

#[derive(Debug, Clone)]
pub struct FileSpecSource {
    path: PathBuf,
}

impl FileSpecSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SpecSource for FileSpecSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> Result<Vec<u8>, SpecError> {
        std::fs::read(&self.path).map_err(|source| SpecError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// An in-memory document.
#[derive(Debug, Clone)]
pub struct BytesSpecSource {
    name: String,
    data: Vec<u8>,
}

impl BytesSpecSource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl SpecSource for BytesSpecSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn read(&self) -> Result<Vec<u8>, SpecError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_source_reads_contents() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"name: a\n").unwrap();

        let source = FileSpecSource::new(file.path());
        assert_eq!(source.read().unwrap(), b"name: a\n");
        assert_eq!(source.describe(), file.path().display().to_string());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let source = FileSpecSource::new("/nonexistent/rpmbundle.yml");
        let err = source.read().unwrap_err();
        assert!(matches!(err, SpecError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/rpmbundle.yml"));
        assert!(err.to_string().starts_with("could not read spec file"));
    }

    #[test]
    fn test_mock_source() {
        let mut mock = MockSpecSource::new();
        mock.expect_read().times(1).returning(|| Ok(b"x".to_vec()));
        assert_eq!(mock.read().unwrap(), b"x");
    }
}
