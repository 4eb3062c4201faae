//! Where archived articles are written
//!
//! The pipeline only talks to the [`Storage`] trait. [`FsStorage`] is the
//! filesystem implementation: one folder per article, named after the title,
//! with ` (1)`, ` (2)` … appended when the name is taken.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Maximum number of attempts to find a unique folder name
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest folder name derived from a title, in characters
const MAX_FOLDER_NAME_CHARS: usize = 80;

/// Persistence of article folders and files
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a new, empty folder for an article under `base`
    async fn create_article_folder(&self, base: &Path, title: &str) -> Result<PathBuf>;

    /// Write `contents` to `folder/name`, returning the full path
    async fn save(&self, folder: &Path, name: &str, contents: &[u8]) -> Result<PathBuf>;

    /// Delete a file; a missing file is not an error
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Delete an article folder and everything in it; a missing folder is not an error
    async fn remove_folder(&self, folder: &Path) -> Result<()>;
}

/// [`Storage`] on the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl FsStorage {
    /// Create a filesystem storage
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn create_article_folder(&self, base: &Path, title: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(base).await?;
        let name = folder_name(title);

        // create_dir fails on an existing path, so two tasks never get the same folder
        for i in 0..=MAX_RENAME_ATTEMPTS {
            let candidate = if i == 0 {
                base.join(&name)
            } else {
                base.join(format!("{name} ({i})"))
            };
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => {
                    tracing::debug!(folder = %candidate.display(), "Created article folder");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Other(format!(
            "could not find a free folder name for '{name}' in {} after {MAX_RENAME_ATTEMPTS} attempts",
            base.display()
        )))
    }

    async fn save(&self, folder: &Path, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = folder.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_folder(&self, folder: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(folder).await {
            Ok(()) => {
                tracing::debug!(folder = %folder.display(), "Removed article folder");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Folder name for an article title
///
/// Path separators, reserved characters and control characters are dropped,
/// whitespace collapsed and the result cut to a sane length. Titles with nothing
/// usable become `untitled`.
pub fn folder_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    // words made only of dots ("..") are dropped
    let collapsed = cleaned
        .split_whitespace()
        .filter(|word| !word.chars().all(|c| c == '.'))
        .collect::<Vec<_>>()
        .join(" ");
    let truncated: String = collapsed.chars().take(MAX_FOLDER_NAME_CHARS).collect();
    let name = truncated.trim().trim_matches('.').trim();

    if name.is_empty() {
        "untitled".to_string()
    } else {
        name.to_string()
    }
}
