//! Scoped staging files for mechanism tools
//!
//! Security templates and policy descriptors are handed to host tools through
//! temporary files. A [`StagingFile`] owns such a file and deletes it when
//! dropped, so it never outlives the operation that needed it, whether that
//! operation returns normally, fails, or unwinds.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::debug;

use crate::{Error, Result};

/// A temporary file removed on drop.
///
/// The file handle is closed right after creation so external tools can open
/// the path exclusively; only the path guard is kept.
#[derive(Debug)]
pub struct StagingFile {
    path: TempPath,
}

impl StagingFile {
    /// Create an empty staging file in the system temp directory.
    pub fn new(prefix: &str, suffix: &str) -> Result<Self> {
        Self::in_dir(&std::env::temp_dir(), prefix, suffix)
    }

    /// Create an empty staging file inside `dir`.
    pub fn in_dir(dir: &Path, prefix: &str, suffix: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|source| Error::Staging {
                dir: dir.to_path_buf(),
                source,
            })?;
        let path = file.into_temp_path();
        debug!(path = %path.display(), "Staging file acquired");
        Ok(Self { path })
    }

    /// Path of the staging file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file's contents.
    pub fn write(&self, content: &[u8]) -> Result<()> {
        fs::write(&self.path, content).map_err(|e| Error::io(self.path(), e))
    }

    /// Read the file's contents as text.
    pub fn read_to_string(&self) -> Result<String> {
        fs::read_to_string(&self.path).map_err(|e| Error::io(self.path(), e))
    }

    /// Owned copy of the path, for logging after the guard is gone.
    pub fn to_path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Staging file released");
    }
}
