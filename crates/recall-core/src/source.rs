//! Locating and reading the documents that get indexed.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{RecallError, Result};
use crate::hashing::fingerprint;

/// A source file read fresh for one indexing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: String,
    pub text: String,
}

impl SourceDocument {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self { path: path.into(), text: text.into() }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let key = path
            .to_str()
            .ok_or_else(|| RecallError::InvalidInput(format!("non UTF-8 path: {}", path.display())))?;
        if !path.is_file() {
            return Err(RecallError::InvalidInput(format!("not a file: {}", key)));
        }
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => String::from_utf8_lossy(&fs::read(path)?).into_owned(),
        };
        Ok(Self { path: key.to_string(), text })
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.text)
    }
}

/// A source that exists but could not be read this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableSource {
    pub path: String,
    pub error: String,
}

/// Everything discovered in one pass: the documents read and the ones that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceBatch {
    pub documents: Vec<SourceDocument>,
    pub unreadable: Vec<UnreadableSource>,
}

/// The memory file plus every file with the configured extension directly
/// inside the memory directory.
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub memory_file: PathBuf,
    pub memory_dir: PathBuf,
    pub extension: String,
}

impl SourceSet {
    /// Paths of all locatable sources, memory file first, the rest sorted.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if self.memory_file.is_file() {
            paths.push(self.memory_file.clone());
        }
        if self.memory_dir.is_dir() {
            let mut in_dir: Vec<PathBuf> = walkdir::WalkDir::new(&self.memory_dir)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().and_then(|s| s.to_str()) == Some(self.extension.as_str()))
                .filter(|p| *p != self.memory_file)
                .collect();
            in_dir.sort();
            paths.extend(in_dir);
        }
        debug!(count = paths.len(), "discovered source documents");
        if paths.is_empty() {
            return Err(RecallError::NoSourceDocuments);
        }
        Ok(paths)
    }

    /// Read every discovered source. A file that cannot be read is set aside
    /// with its error; only an empty source set fails the whole call.
    pub fn read_all(&self) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();
        for path in self.discover()? {
            match SourceDocument::read(&path) {
                Ok(doc) => batch.documents.push(doc),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "source unreadable");
                    batch.unreadable.push(UnreadableSource { path: path.to_string_lossy().into_owned(), error: e.to_string() });
                }
            }
        }
        Ok(batch)
    }
}
