//! Lexical path utilities.
//!
//! Destinations are computed before any file exists, so everything here
//! resolves `.` and `..` by looking at components only. `canonicalize` is
//! never used: it would require the paths to exist and would follow
//! symlinks, which the in-memory filesystem cannot model.

use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` components without touching the filesystem.
/// `..` at the root is dropped, as `os.path` does.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // Relative path climbing above its start keeps the `..`.
                    out.push(Component::ParentDir.as_os_str());
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Absolute, normalized form of `path`; relative paths are resolved against
/// the current working directory.
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize(&cwd.join(path))
    }
}

/// Join two relative POSIX-style path strings. A leading `/` on `tail` is
/// trimmed so the result always stays under `base`.
pub fn join_posix(base: &str, tail: &str) -> String {
    let tail = tail.trim_start_matches('/');
    if base.is_empty() {
        return tail.to_string();
    }
    if tail.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), tail)
}

/// Final path segment of a POSIX-style path string.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Replace the extension (or append one when there is none).
pub fn swap_extension(path: &Path, new_extension: &str) -> PathBuf {
    path.with_extension(new_extension)
}

/// `path` relative to `base`, when `base` is an ancestor (lexically).
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    normalize(path)
        .strip_prefix(normalize(base))
        .ok()
        .map(Path::to_path_buf)
}

/// Forward-slash rendering used for rule matching and index keys.
pub fn to_posix_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
