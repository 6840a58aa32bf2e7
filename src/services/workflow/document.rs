//! Document loading for a run.
//!
//! Only Markdown and plain text are read directly; other formats must be
//! converted beforehand.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::sha256_hex;

use super::driver::RunRequest;

const SUPPORTED_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

/// A loaded source document.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// Canonical path string. Keys both the vector store and the checkpoints.
    pub document_path: String,
    pub thread_id: String,
    pub content: String,
}

impl SourceDocument {
    /// Resolve `path` without reading it.
    pub fn locate(path: &Path) -> AppResult<(String, String)> {
        if !path.exists() {
            return Err(AppError::not_found(format!("document {}", path.display())));
        }
        let canonical = std::fs::canonicalize(path)?;
        let document_path = canonical.to_string_lossy().to_string();
        let thread_id = sha256_hex(&document_path);
        Ok((document_path, thread_id))
    }

    /// Read `path`, rejecting formats that need conversion first.
    pub fn load(path: &Path) -> AppResult<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::validation(format!(
                "unsupported document format '{}': convert {} to Markdown first",
                extension,
                path.display()
            )));
        }

        let (document_path, thread_id) = Self::locate(path)?;
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Err(AppError::validation(format!(
                "document {} is empty",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            document_path,
            thread_id,
            content,
        })
    }

    pub fn into_request(
        self,
        question: Option<String>,
        role: Option<String>,
        fresh: bool,
    ) -> RunRequest {
        RunRequest {
            document_path: self.document_path,
            thread_id: self.thread_id,
            content: self.content,
            question,
            role,
            fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::paths::document_id;

    #[test]
    fn test_load_markdown_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.md");
        std::fs::write(&path, "# Title\n\nBody.").unwrap();

        let doc = SourceDocument::load(&path).unwrap();

        assert_eq!(doc.content, "# Title\n\nBody.");
        assert_eq!(doc.thread_id, document_id(&path));
        assert_eq!(doc.thread_id, sha256_hex(&doc.document_path));
    }

    #[test]
    fn test_rejects_unconverted_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, "%PDF").unwrap();

        let err = SourceDocument::load(&path).unwrap_err();
        assert!(err.to_string().contains("convert"));
    }

    #[test]
    fn test_missing_and_empty_documents() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SourceDocument::load(&dir.path().join("absent.txt")),
            Err(AppError::NotFound(_))
        ));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(matches!(SourceDocument::load(&empty), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_into_request_carries_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.TXT");
        std::fs::write(&path, "text").unwrap();

        let doc = SourceDocument::load(&path).unwrap();
        let thread_id = doc.thread_id.clone();
        let request = doc.into_request(Some("Why?".to_string()), None, true);

        assert_eq!(request.thread_id, thread_id);
        assert_eq!(request.question.as_deref(), Some("Why?"));
        assert!(request.fresh);
    }
}
