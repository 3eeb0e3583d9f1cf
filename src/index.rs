//! Per-repo file index.
//!
//! The destination keeps one small JSON file per indexed item under
//! `<dir>/<repo>/<sha256(file)>`, so several repos can update their own
//! slices without sharing a lock file. The index is what lets the delete
//! detector remove stale outputs of *this* repo without ever touching files
//! owned by another one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::filesystem::Filesystem;
use crate::hashing::sha256_hex;

#[derive(Error, Debug)]
#[error("The file {file} is already indexed from repository {repo}")]
pub struct FileIndexError {
    pub file: String,
    pub repo: String,
}

/// One produced destination file: path relative to the destination root plus
/// the repo label that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexItem {
    pub file: String,
    pub repo: String,
}

impl FileIndexItem {
    pub fn new(file: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            repo: repo.into(),
        }
    }
}

/// Invariant: at most one item per `file`.
#[derive(Debug, Default)]
pub struct FileIndex {
    items: Vec<FileIndexItem>,
    removed: Vec<FileIndexItem>,
}

impl FileIndex {
    pub fn new(items: Vec<FileIndexItem>) -> Self {
        Self {
            items,
            removed: Vec::new(),
        }
    }

    pub fn items(&self) -> &[FileIndexItem] {
        &self.items
    }

    /// Items dropped since load; their backing files are deleted on save.
    pub fn removed(&self) -> &[FileIndexItem] {
        &self.removed
    }

    /// Same file from the same repo is a no-op; the same file claimed by a
    /// different repo is a collision.
    pub fn add(&mut self, item: FileIndexItem) -> Result<(), FileIndexError> {
        for existing in &self.items {
            if existing.file != item.file {
                continue;
            }
            if existing.repo == item.repo {
                return Ok(());
            }
            return Err(FileIndexError {
                file: item.file,
                repo: existing.repo.clone(),
            });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn remove(&mut self, item: &FileIndexItem) {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|existing| existing.file == item.file);
        self.items = kept;
        self.removed.extend(dropped);
    }
}

pub struct FileIndexLoader;

impl FileIndexLoader {
    pub fn load(directory: &Path, fs: &dyn Filesystem) -> Result<FileIndex> {
        let mut items = Vec::new();
        for file in fs.scan(directory, ".*")? {
            let text = fs.read_string(&directory.join(&file))?;
            let item: FileIndexItem = serde_json::from_str(&text)
                .with_context(|| format!("malformed index item {file}"))?;
            items.push(item);
        }
        Ok(FileIndex::new(items))
    }

    pub fn save(index: &FileIndex, directory: &Path, fs: &dyn Filesystem) -> Result<()> {
        for item in index.items() {
            fs.write_string(
                &directory.join(&item.repo).join(sha256_hex(item.file.as_bytes())),
                &serde_json::to_string(item)?,
            )?;
        }
        for removed in index.removed() {
            fs.delete(&directory.join(&removed.repo).join(sha256_hex(removed.file.as_bytes())))?;
        }
        Ok(())
    }

    /// Scoped lifecycle: load on entry, save on normal exit, no save on
    /// error. Dry runs pass `save = false`.
    pub fn loaded<T>(
        directory: &Path,
        fs: &dyn Filesystem,
        save: bool,
        run: impl FnOnce(&mut FileIndex) -> Result<T>,
    ) -> Result<T> {
        let mut index = Self::load(directory, fs)?;
        let out = run(&mut index)?;
        if save {
            Self::save(&index, directory, fs)?;
        }
        Ok(out)
    }
}
