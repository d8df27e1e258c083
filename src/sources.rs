//! Project content repositories consumed by knowledge-base builds.
//!
//! [`FsSourceRepository`] lays a project out on disk as:
//!
//! ```text
//! <root>/<project>/transcriptions/**   one transcript per file
//! <root>/<project>/documents/**        one document per file
//! ```
//!
//! The content id of a file is its path relative to the project directory
//! (`transcriptions/2024-05-01-standup.txt`), so re-scans yield the same
//! ids and incremental knowledge-base updates can name what changed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::models::{ContentMetadata, ContentType, SourceInfo};

/// One transcription or document with the metadata it will be indexed
/// under.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceContent {
    pub metadata: ContentMetadata,
    pub text: String,
}

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn list_transcriptions(&self, project_id: &str) -> Result<Vec<SourceContent>>;

    async fn list_documents(&self, project_id: &str) -> Result<Vec<SourceContent>>;
}

pub struct FsSourceRepository {
    root: PathBuf,
}

impl FsSourceRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn scan(&self, project_id: &str, content_type: ContentType) -> Result<Vec<SourceContent>> {
        let project_dir = self.root.join(project_id);
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || scan_dir(&project_dir, &project_id, content_type))
            .await
            .context("source scan task failed")?
    }
}

#[async_trait]
impl SourceRepository for FsSourceRepository {
    async fn list_transcriptions(&self, project_id: &str) -> Result<Vec<SourceContent>> {
        self.scan(project_id, ContentType::Transcription).await
    }

    async fn list_documents(&self, project_id: &str) -> Result<Vec<SourceContent>> {
        self.scan(project_id, ContentType::Document).await
    }
}

fn folder(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Transcription => "transcriptions",
        ContentType::Document => "documents",
    }
}

/// Missing folders are an empty project, not an error.
fn scan_dir(project_dir: &Path, project_id: &str, content_type: ContentType) -> Result<Vec<SourceContent>> {
    let dir = project_dir.join(folder(content_type));
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(&dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            // Binary files (audio next to its transcript, images) are skipped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        let relative = path
            .strip_prefix(project_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        items.push(SourceContent {
            metadata: file_metadata(path, &relative, project_id, content_type)?,
            text,
        });
    }

    items.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
    Ok(items)
}

fn file_metadata(
    path: &Path,
    relative: &str,
    project_id: &str,
    content_type: ContentType,
) -> Result<ContentMetadata> {
    let modified: DateTime<Utc> = std::fs::metadata(path)?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let mut metadata = ContentMetadata::new(content_type, project_id);
    metadata.id = relative.to_string();
    metadata.timestamp = modified;
    match content_type {
        ContentType::Transcription => metadata.recording_id = Some(relative.to_string()),
        ContentType::Document => metadata.document_id = Some(relative.to_string()),
    }
    metadata.source_info = SourceInfo {
        title: path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string()),
        origin: Some(format!("file://{}", path.display())),
        ..Default::default()
    };
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scans_project_folders() {
        let tmp = tempfile::TempDir::new().unwrap();
        let project = tmp.path().join("alpha");
        std::fs::create_dir_all(project.join("transcriptions/2024")).unwrap();
        std::fs::create_dir_all(project.join("documents")).unwrap();
        std::fs::write(project.join("transcriptions/2024/standup.txt"), "今日の会議").unwrap();
        std::fs::write(project.join("transcriptions/.hidden"), "skip").unwrap();
        std::fs::write(project.join("documents/design.md"), "# Notes").unwrap();

        let repo = FsSourceRepository::new(tmp.path());
        let transcriptions = repo.list_transcriptions("alpha").await.unwrap();
        assert_eq!(transcriptions.len(), 1);
        let t = &transcriptions[0];
        assert_eq!(t.metadata.id, "transcriptions/2024/standup.txt");
        assert_eq!(t.metadata.content_type, ContentType::Transcription);
        assert_eq!(t.metadata.recording_id.as_deref(), Some("transcriptions/2024/standup.txt"));
        assert_eq!(t.metadata.title(), "standup");
        assert_eq!(t.text, "今日の会議");

        let documents = repo.list_documents("alpha").await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].metadata.project_id, "alpha");
    }

    #[tokio::test]
    async fn test_missing_project_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = FsSourceRepository::new(tmp.path());
        assert!(repo.list_documents("nope").await.unwrap().is_empty());
    }
}
