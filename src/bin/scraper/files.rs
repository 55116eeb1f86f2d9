//! The screenshots directory as the HTTP layer sees it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::warn;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotFile {
    pub filename: String,
    pub url: String,
    pub size: String,
    pub created: String,
    pub modified: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub count: usize,
    pub directory_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deleted {
    pub deleted: usize,
    pub total: usize,
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("invalid file name")]
    InvalidName,
    #[error("screenshot not found")]
    NotFound,
    #[error("only .png, .jpg and .jpeg files are served")]
    Unsupported,
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

pub fn content_type(name: &str) -> &'static str {
    if name.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

fn format_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}

#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn image_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if is_image(name) && entry.file_type().await?.is_file() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Image files, newest first.
    pub async fn list(&self) -> io::Result<Vec<ScreenshotFile>> {
        let mut files = Vec::new();
        for name in self.image_names().await? {
            let meta = tokio::fs::metadata(self.dir.join(&name)).await?;
            let modified = meta.modified()?;
            let created = meta.created().unwrap_or(modified);
            files.push((
                modified,
                ScreenshotFile {
                    url: format!("/screenshots/{name}"),
                    size: format_size(meta.len()),
                    created: format_time(created),
                    modified: format_time(modified),
                    filename: name,
                },
            ));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(files.into_iter().map(|(_, f)| f).collect())
    }

    pub async fn delete_all(&self) -> io::Result<Deleted> {
        let names = self.image_names().await?;
        let mut deleted = 0;
        for name in &names {
            match tokio::fs::remove_file(self.dir.join(name)).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to delete screenshot"),
            }
        }
        Ok(Deleted {
            deleted,
            total: names.len(),
        })
    }

    pub async fn stats(&self) -> io::Result<Stats> {
        Ok(Stats {
            count: self.image_names().await?.len(),
            directory_exists: tokio::fs::try_exists(&self.dir).await.unwrap_or(false),
        })
    }

    /// Read one image. Names with path components are refused outright.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, FileError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(FileError::InvalidName);
        }
        let path = self.dir.join(name);
        if !tokio::fs::try_exists(&path).await? {
            return Err(FileError::NotFound);
        }
        if !is_image(name) {
            return Err(FileError::Unsupported);
        }
        Ok(tokio::fs::read(path).await?)
    }
}
