use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::info;

use crate::error::PackError;
use crate::pipeline::ConversionResult;

/// Destination directory for finished archives.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), PackError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| PackError::Filesystem(err.to_string()))
    }

    pub fn path_for(&self, filename: &str) -> Result<Utf8PathBuf, PackError> {
        let name = Utf8Path::new(filename);
        match name.file_name() {
            Some(file_name) if file_name == filename => Ok(self.root.join(file_name)),
            _ => Err(PackError::Filesystem(format!(
                "refusing to write outside the output directory: {filename}"
            ))),
        }
    }

    /// Writes what the result says should be delivered and returns the paths.
    pub fn deliver(&self, result: &ConversionResult) -> Result<Vec<Utf8PathBuf>, PackError> {
        self.ensure_root()?;
        let mut written = Vec::new();
        for output in result.deliverables() {
            let path = self.path_for(&output.filename)?;
            Self::write_file_atomic(&path, &output.bytes)?;
            info!(path = %path, bytes = output.size, "archive written");
            written.push(path);
        }
        Ok(written)
    }

    pub fn write_file_atomic(dest: &Utf8Path, bytes: &[u8]) -> Result<(), PackError> {
        let parent = dest
            .parent()
            .map(|parent| if parent.as_str().is_empty() { Utf8Path::new(".") } else { parent })
            .ok_or_else(|| PackError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PackError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("packshift-out")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PackError::Filesystem(err.to_string()))?;
        temp.write_all(bytes)
            .map_err(|err| PackError::Filesystem(err.to_string()))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| PackError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
