use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::processor::DocumentRef;

/// A document loaded for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Stores upload payloads and reads rendered documents back.
pub struct UploadStorage {
    upload_directory: PathBuf,
}

impl UploadStorage {
    pub fn new<P: AsRef<Path>>(upload_directory: P) -> Self {
        Self {
            upload_directory: upload_directory.as_ref().to_path_buf(),
        }
    }

    pub fn upload_directory(&self) -> &Path {
        &self.upload_directory
    }

    /// Writes an upload as `<job_id>.<ext>`. Never overwrites an existing file.
    pub fn save(&self, job_id: &str, extension: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure_directory(&self.upload_directory)?;
        let path = self
            .upload_directory
            .join(format!("{}.{}", job_id, extension.to_ascii_lowercase()));

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(content).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        log::debug!("Stored upload for job {} ({} bytes)", job_id, content.len());
        Ok(path)
    }

    /// Reads a rendered document. A file removed by cleanup is reported as
    /// not found.
    pub fn read_document(&self, job_id: &str, document: &DocumentRef) -> Result<Document, StorageError> {
        let bytes = match std::fs::read(&document.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ArtifactNotFound {
                    job_id: job_id.to_string(),
                    artifact: "Document",
                });
            }
            Err(e) => {
                return Err(StorageError::ReadFile {
                    path: document.path.clone(),
                    source: e,
                })
            }
        };

        let file_name = document
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("report")
            .to_string();

        Ok(Document {
            path: document.path.clone(),
            file_name,
            content_type: document.content_type.clone(),
            bytes,
        })
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}
