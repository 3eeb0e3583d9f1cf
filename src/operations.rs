//! Planned mutations of the destination tree.
//!
//! Every operation knows how to execute itself against a [`Filesystem`] and
//! how to answer "would executing you change anything?"; the change predicate
//! is what makes reruns no-ops. The set of variants is sealed: detectors and
//! the copier only ever dispatch through [`Operation`].

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::copier::PathFormatter;
use crate::filesystem::Filesystem;
use crate::frontmatter::{self, FrontmatterEnricher};
use crate::hashing::sha256_hex;
use crate::paths::{absolute, basename, normalize, relative_to, to_posix_string};
use crate::render::{OpenApiBundler, PlantUmlRenderer};

#[derive(Clone, Debug)]
pub enum Operation {
    Copy(CopyFile),
    EnrichedCopy(MarkdownCopy),
    Delete(DeleteFile),
    PlantUml(PlantUmlRender),
    OpenApi(OpenApiBundle),
}

impl Operation {
    pub fn copy(source_abs: PathBuf, destination_abs: PathBuf) -> Self {
        Self::Copy(CopyFile {
            source_abs,
            destination_abs,
        })
    }

    pub fn enriched_copy(
        source_abs: PathBuf,
        destination_abs: PathBuf,
        from_abs: PathBuf,
        author: String,
        branch: String,
    ) -> Self {
        Self::EnrichedCopy(MarkdownCopy {
            source_abs,
            destination_abs,
            from_abs,
            author,
            branch,
        })
    }

    pub fn delete(destination_abs: PathBuf) -> Self {
        Self::Delete(DeleteFile { destination_abs })
    }

    pub fn plantuml(
        source_abs: PathBuf,
        destination_abs: PathBuf,
        renderer: Rc<dyn PlantUmlRenderer>,
    ) -> Self {
        Self::PlantUml(PlantUmlRender {
            source_abs,
            destination_abs,
            renderer,
        })
    }

    pub fn openapi(
        source_abs: PathBuf,
        destination_abs: PathBuf,
        ref_files: Vec<PathBuf>,
        dirty_refs: bool,
        bundler: Rc<dyn OpenApiBundler>,
    ) -> Self {
        Self::OpenApi(OpenApiBundle {
            source_abs,
            destination_abs,
            ref_files,
            dirty_refs,
            bundler,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Copy(_) => "copy",
            Self::EnrichedCopy(_) => "enriched-copy",
            Self::Delete(_) => "delete",
            Self::PlantUml(_) => "plantuml",
            Self::OpenApi(_) => "openapi",
        }
    }

    pub fn source_abs(&self) -> Option<&Path> {
        match self {
            Self::Copy(op) => Some(&op.source_abs),
            Self::EnrichedCopy(op) => Some(&op.source_abs),
            Self::Delete(_) => None,
            Self::PlantUml(op) => Some(&op.source_abs),
            Self::OpenApi(op) => Some(&op.source_abs),
        }
    }

    pub fn destination_abs(&self) -> &Path {
        match self {
            Self::Copy(op) => &op.destination_abs,
            Self::EnrichedCopy(op) => &op.destination_abs,
            Self::Delete(op) => &op.destination_abs,
            Self::PlantUml(op) => &op.destination_abs,
            Self::OpenApi(op) => &op.destination_abs,
        }
    }

    /// Source-side files this operation reads.
    pub fn source_files(&self) -> Vec<&Path> {
        self.source_abs().into_iter().collect()
    }

    /// Destination-side files this operation produces. Deletes produce
    /// nothing, which is exactly why the delete detector ignores them when
    /// computing what the current run publishes.
    pub fn destination_files(&self) -> Vec<&Path> {
        match self {
            Self::Delete(_) => vec![],
            _ => vec![self.destination_abs()],
        }
    }

    pub fn execute(&self, fs: &dyn Filesystem) -> Result<()> {
        match self {
            Self::Copy(op) => op.execute(fs),
            Self::EnrichedCopy(op) => op.execute(fs),
            Self::Delete(op) => op.execute(fs),
            Self::PlantUml(op) => op.execute(fs),
            Self::OpenApi(op) => op.execute(fs),
        }
    }

    pub fn has_changes(&self, fs: &dyn Filesystem) -> Result<bool> {
        match self {
            Self::Copy(op) => op.has_changes(fs),
            Self::EnrichedCopy(op) => op.has_changes(fs),
            // Deleting is always worth doing.
            Self::Delete(_) => Ok(true),
            Self::PlantUml(op) => op.has_changes(fs),
            Self::OpenApi(op) => op.has_changes(fs),
        }
    }

    pub fn describe(&self, formatter: &dyn PathFormatter) -> String {
        let src = |p: &Path| formatter.format(p);
        match self {
            Self::Copy(op) => {
                format!("[COPY] {} -> {}", src(&op.source_abs), src(&op.destination_abs))
            }
            Self::EnrichedCopy(op) => {
                format!("[COPY] {} -> {}", src(&op.source_abs), src(&op.destination_abs))
            }
            Self::Delete(op) => format!("[DELETE] {}", src(&op.destination_abs)),
            Self::PlantUml(op) => {
                format!("[PLANTUML] {} -> {}", src(&op.source_abs), src(&op.destination_abs))
            }
            Self::OpenApi(op) => {
                format!("[OPENAPI] {} -> {}", src(&op.source_abs), src(&op.destination_abs))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Plain copy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CopyFile {
    pub source_abs: PathBuf,
    pub destination_abs: PathBuf,
}

impl CopyFile {
    fn execute(&self, fs: &dyn Filesystem) -> Result<()> {
        fs.copy(&self.source_abs, &self.destination_abs)
    }

    fn has_changes(&self, fs: &dyn Filesystem) -> Result<bool> {
        if !fs.is_file(&self.destination_abs) {
            return Ok(true);
        }
        let source = sha256_hex(&fs.read_bytes(&self.source_abs)?);
        let destination = sha256_hex(&fs.read_bytes(&self.destination_abs)?);
        Ok(source != destination)
    }
}

// ---------------------------------------------------------------------------
// Enriched Markdown copy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct MarkdownCopy {
    pub source_abs: PathBuf,
    pub destination_abs: PathBuf,
    /// Source repository root; its basename is the repo name used in the
    /// edit URL.
    pub from_abs: PathBuf,
    pub author: String,
    pub branch: String,
}

impl MarkdownCopy {
    fn repo(&self) -> String {
        basename(&to_posix_string(&absolute(&self.from_abs))).to_string()
    }

    fn source_rel(&self) -> String {
        relative_to(&self.source_abs, &absolute(&self.from_abs))
            .map(|rel| to_posix_string(&rel))
            .unwrap_or_else(|| to_posix_string(&self.source_abs))
    }

    fn execute(&self, fs: &dyn Filesystem) -> Result<()> {
        let source_text = fs.read_string(&self.source_abs)?;
        let repo = self.repo();
        let source_rel = self.source_rel();
        let attributes = vec![
            frontmatter::custom_edit_url(&repo, &source_rel, &self.branch),
            frontmatter::last_update(&self.author),
            frontmatter::source_frontmatter_hash(&source_text),
            frontmatter::enriched_marker(),
        ];
        let enriched = FrontmatterEnricher::new(&source_text).enrich(&attributes);
        fs.write_string(&self.destination_abs, &enriched)
    }

    fn has_changes(&self, fs: &dyn Filesystem) -> Result<bool> {
        if !fs.is_file(&self.destination_abs) {
            return Ok(true);
        }
        let destination_text = fs.read_string(&self.destination_abs)?;
        if !destination_text.contains("x_tech_docs_enriched: true") {
            return Ok(true);
        }
        let source_text = fs.read_string(&self.source_abs)?;
        let source_body = FrontmatterEnricher::new(&source_text).strip();
        let destination_body = FrontmatterEnricher::new(&destination_text).strip();
        if sha256_hex(source_body.as_bytes()) != sha256_hex(destination_body.as_bytes()) {
            return Ok(true);
        }
        if let Some(source_hash) = frontmatter::frontmatter_hash(&source_text) {
            let stored = frontmatter::extract_source_frontmatter_hash(&destination_text);
            if stored.as_deref() != Some(source_hash.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct DeleteFile {
    pub destination_abs: PathBuf,
}

impl DeleteFile {
    fn execute(&self, fs: &dyn Filesystem) -> Result<()> {
        fs.delete(&self.destination_abs)
    }
}

// ---------------------------------------------------------------------------
// PlantUML render
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PlantUmlRender {
    pub source_abs: PathBuf,
    pub destination_abs: PathBuf,
    renderer: Rc<dyn PlantUmlRenderer>,
}

impl std::fmt::Debug for PlantUmlRender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlantUmlRender")
            .field("source_abs", &self.source_abs)
            .field("destination_abs", &self.destination_abs)
            .finish()
    }
}

const HASH_MARKER_PREFIX: &str = "@tech-docs-hash=";

impl PlantUmlRender {
    fn execute(&self, fs: &dyn Filesystem) -> Result<()> {
        let content = full_puml_content(fs, &self.source_abs)?;
        let svg = self.renderer.render(&content)?;
        let marked = insert_hash_marker(&svg, &sha256_hex(content.as_bytes()))?;
        fs.write_string(&self.destination_abs, &marked)
    }

    fn has_changes(&self, fs: &dyn Filesystem) -> Result<bool> {
        if !fs.is_file(&self.destination_abs) {
            return Ok(true);
        }
        let content = full_puml_content(fs, &self.source_abs)?;
        let marker = format!("{HASH_MARKER_PREFIX}{}", sha256_hex(content.as_bytes()));
        Ok(!fs.read_string(&self.destination_abs)?.contains(&marker))
    }
}

fn insert_hash_marker(svg: &str, hash: &str) -> Result<String> {
    let at = svg
        .find("<svg ")
        .context("renderer output contains no <svg element")?;
    Ok(format!(
        "{}<!-- {HASH_MARKER_PREFIX}{hash} -->{}",
        &svg[..at],
        &svg[at..]
    ))
}

/// The diagram with non-URL `!include` directives recursively inlined. The
/// hash of this text is what the destination marker records, so an edit in
/// any included file invalidates the rendered SVG. Includes that cannot be
/// read, point at URLs, or would cycle are left as-is for the renderer.
pub fn full_puml_content(fs: &dyn Filesystem, file: &Path) -> Result<String> {
    let mut visited = HashSet::new();
    inline_includes(fs, file, &mut visited)
}

fn inline_includes(
    fs: &dyn Filesystem,
    file: &Path,
    visited: &mut HashSet<PathBuf>,
) -> Result<String> {
    visited.insert(normalize(file));
    let text = fs.read_string(file)?;
    let parent = file.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let target = line
            .trim_start()
            .strip_prefix("!include ")
            .map(str::trim)
            .filter(|t| !t.starts_with("http://") && !t.starts_with("https://"));
        let Some(target) = target else {
            out.push_str(line);
            continue;
        };
        let included_path = normalize(&parent.join(target));
        if visited.contains(&included_path) || !fs.is_file(&included_path) {
            out.push_str(line);
            continue;
        }
        let included = inline_includes(fs, &included_path, visited)?;
        out.push_str(&included);
        if !included.ends_with('\n') {
            out.push('\n');
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// OpenAPI bundle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenApiBundle {
    pub source_abs: PathBuf,
    pub destination_abs: PathBuf,
    /// Files the spec transitively `$ref`erences, as resolved by the
    /// detector.
    pub ref_files: Vec<PathBuf>,
    /// Whether the detector saw a pending change to any referenced file;
    /// forces a re-bundle even when the spec itself is untouched.
    pub dirty_refs: bool,
    bundler: Rc<dyn OpenApiBundler>,
}

impl std::fmt::Debug for OpenApiBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenApiBundle")
            .field("source_abs", &self.source_abs)
            .field("destination_abs", &self.destination_abs)
            .field("ref_files", &self.ref_files)
            .field("dirty_refs", &self.dirty_refs)
            .finish()
    }
}

impl OpenApiBundle {
    fn execute(&self, fs: &dyn Filesystem) -> Result<()> {
        let bundled = self.bundler.bundle(&self.source_abs)?;
        let mut value: Value = serde_json::from_str(&bundled).with_context(|| {
            format!("bundler produced invalid JSON for {}", self.source_abs.display())
        })?;
        let object = value.as_object_mut().with_context(|| {
            format!("bundler produced a non-object for {}", self.source_abs.display())
        })?;
        object.insert(
            "x-api-checksum".to_string(),
            Value::String(sha256_hex(&fs.read_bytes(&self.source_abs)?)),
        );
        fs.write_string(&self.destination_abs, &serde_json::to_string_pretty(&value)?)
    }

    fn has_changes(&self, fs: &dyn Filesystem) -> Result<bool> {
        if !fs.is_file(&self.destination_abs) {
            return Ok(true);
        }
        let stored = stored_checksum(&fs.read_string(&self.destination_abs)?);
        let current = sha256_hex(&fs.read_bytes(&self.source_abs)?);
        if stored.as_deref() != Some(current.as_str()) {
            return Ok(true);
        }
        Ok(self.dirty_refs)
    }
}

fn stored_checksum(destination: &str) -> Option<String> {
    let pattern = Regex::new(r#""x-api-checksum":\s*"([a-f0-9]+)""#).expect("static regex");
    pattern
        .captures(destination)
        .map(|captures| captures[1].to_string())
}
