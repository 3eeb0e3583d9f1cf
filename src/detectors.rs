//! Operation detection.
//!
//! A run is a chain of detectors, each receiving the operation list the
//! previous stage produced and returning a transformed one: the copy
//! detector seeds it from the rules, the PlantUML and OpenAPI detectors swap
//! matching copies for render/bundle operations, the delete detector appends
//! deletions for indexed files this repo no longer produces, and the filter
//! detector drops whatever would be a no-op. Order matters: extension swaps
//! must happen before delete detection sees the final destinations, and
//! filtering must run last so reruns do nothing.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::{Config, ConfigDocumentEntry, ProjectRegistry};
use crate::filesystem::Filesystem;
use crate::index::{FileIndex, FileIndexItem};
use crate::operations::Operation;
use crate::paths::{absolute, basename, join_posix, normalize, relative_to, swap_extension, to_posix_string};
use crate::render::{OpenApiBundler, PlantUmlRenderer};
use crate::shape;

pub trait OperationDetector {
    fn detect(&mut self, fs: &dyn Filesystem, previous: Vec<Operation>) -> Result<Vec<Operation>>;
}

/// Runs detectors in order; each stage owns its own copy of the list.
pub struct OperationDetectorChain<'a> {
    detectors: Vec<Box<dyn OperationDetector + 'a>>,
}

impl<'a> OperationDetectorChain<'a> {
    pub fn new(detectors: Vec<Box<dyn OperationDetector + 'a>>) -> Self {
        Self { detectors }
    }

    pub fn operations(&mut self, fs: &dyn Filesystem) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();
        for detector in &mut self.detectors {
            operations = detector.detect(fs, operations)?;
        }
        Ok(operations)
    }
}

// ---------------------------------------------------------------------------
// Rule matching
// ---------------------------------------------------------------------------

/// Translates a config pattern into a prefix-anchored regex: `**/*` spans
/// directories, a single `*` stops at a slash.
pub struct PatternMatcher {
    regex: Regex,
}

impl PatternMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = regex::escape(pattern)
            .replace(r"\*\*/\*", ".*")
            .replace(r"\*", "[^/]*");
        let regex = Regex::new(&format!("^(?:{translated})"))
            .with_context(|| format!("unusable source pattern `{pattern}`"))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

pub struct Rule {
    pub entry: ConfigDocumentEntry,
    matcher: PatternMatcher,
    excluders: Vec<PatternMatcher>,
}

impl Rule {
    pub fn new(entry: ConfigDocumentEntry) -> Result<Self> {
        let matcher = PatternMatcher::new(&entry.source)?;
        let excluders = entry
            .exclude
            .iter()
            .map(|pattern| PatternMatcher::new(pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            entry,
            matcher,
            excluders,
        })
    }

    pub fn matches(&self, file: &str) -> bool {
        self.matcher.matches(file) && !self.excluders.iter().any(|excluder| excluder.matches(file))
    }
}

// ---------------------------------------------------------------------------
// Copy detection
// ---------------------------------------------------------------------------

const MARKDOWN_EXTENSIONS: [&str; 4] = [".md", ".MD", ".mdx", ".MDX"];

pub struct CopyDetector<'a> {
    rules: Vec<Rule>,
    from_path: PathBuf,
    to_path: PathBuf,
    author: String,
    branch: String,
    registry: &'a ProjectRegistry,
}

impl<'a> CopyDetector<'a> {
    pub fn new(
        from_path: &Path,
        to_path: &Path,
        author: &str,
        branch: &str,
        config: Config,
        registry: &'a ProjectRegistry,
    ) -> Result<Self> {
        let rules = config
            .documents
            .into_iter()
            .map(Rule::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            from_path: from_path.to_path_buf(),
            to_path: to_path.to_path_buf(),
            author: author.to_string(),
            branch: branch.to_string(),
            registry,
        })
    }

    fn create_operation(&self, fs: &dyn Filesystem, file: &str, rule: &Rule) -> Result<Option<Operation>> {
        let source = rule.entry.source.as_str();
        let destination = rule.entry.destination.as_str();

        let (relative_src, relative_dst) = if shape::looks_fileish(source)
            && shape::looks_dirish(destination)
        {
            let tail = if shape::looks_globish(source) {
                // Keep the subtree below the fixed prefix, e.g.
                // `recursive/**/*.txt` maps `recursive/x/b.txt` to `x/b.txt`.
                let prefix = source.split("**/*").next().unwrap_or("");
                file.strip_prefix(prefix).unwrap_or(file).to_string()
            } else {
                basename(file).to_string()
            };
            (file, join_posix(destination, &tail))
        } else if shape::looks_fileish(source) && shape::looks_fileish(destination) {
            (file, destination.to_string())
        } else if shape::looks_dirish(source) && shape::looks_dirish(destination) {
            // Drop the pattern minus its final character, so `docs/*` keeps
            // everything under `docs/` including subdirectories.
            let cut = source.len() - source.chars().last().map_or(0, char::len_utf8);
            let tail = file.get(cut..).unwrap_or("");
            (file, join_posix(destination, tail))
        } else {
            return Ok(None);
        };

        let source_abs = absolute(&self.from_path.join(relative_src));
        let doc_path = self.registry.doc_path(fs, &rule.entry.project)?;
        let destination_abs = absolute(&self.to_path.join(doc_path).join(relative_dst));

        let op = if MARKDOWN_EXTENSIONS.iter().any(|ext| relative_src.ends_with(ext)) {
            Operation::enriched_copy(
                source_abs,
                destination_abs,
                absolute(&self.from_path),
                self.author.clone(),
                self.branch.clone(),
            )
        } else {
            Operation::copy(source_abs, destination_abs)
        };
        Ok(Some(op))
    }
}

impl OperationDetector for CopyDetector<'_> {
    fn detect(&mut self, fs: &dyn Filesystem, _previous: Vec<Operation>) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();
        for file in fs.scan(&self.from_path, ".*")? {
            let Some(rule) = self.rules.iter().find(|rule| rule.matches(&file)) else {
                continue;
            };
            if let Some(op) = self.create_operation(fs, &file, rule)? {
                operations.push(op);
            }
        }
        Ok(operations)
    }
}

// ---------------------------------------------------------------------------
// PlantUML detection
// ---------------------------------------------------------------------------

pub struct PlantUmlDetector {
    renderer: Rc<dyn PlantUmlRenderer>,
}

impl PlantUmlDetector {
    pub fn new(renderer: Rc<dyn PlantUmlRenderer>) -> Self {
        Self { renderer }
    }
}

impl OperationDetector for PlantUmlDetector {
    fn detect(&mut self, _fs: &dyn Filesystem, previous: Vec<Operation>) -> Result<Vec<Operation>> {
        let (pumls, mut kept): (Vec<_>, Vec<_>) = previous.into_iter().partition(|op| {
            op.source_files()
                .iter()
                .any(|file| to_posix_string(file).ends_with(".puml"))
        });
        for puml in pumls {
            let source = puml
                .source_abs()
                .context("diagram operation without a source")?
                .to_path_buf();
            kept.push(Operation::plantuml(
                source,
                swap_extension(puml.destination_abs(), "svg"),
                Rc::clone(&self.renderer),
            ));
        }
        Ok(kept)
    }
}

// ---------------------------------------------------------------------------
// OpenAPI detection
// ---------------------------------------------------------------------------

pub struct OpenApiDetector {
    bundler: Rc<dyn OpenApiBundler>,
}

impl OpenApiDetector {
    pub fn new(bundler: Rc<dyn OpenApiBundler>) -> Self {
        Self { bundler }
    }
}

impl OperationDetector for OpenApiDetector {
    fn detect(&mut self, fs: &dyn Filesystem, previous: Vec<Operation>) -> Result<Vec<Operation>> {
        let mut spec_indices = Vec::new();
        for (i, op) in previous.iter().enumerate() {
            let Some(source) = op.source_abs() else { continue };
            let name = to_posix_string(source);
            let speclike =
                name.ends_with(".yaml") || name.ends_with(".yml") || name.ends_with(".json");
            if speclike && is_openapi_spec(fs, source) {
                spec_indices.push(i);
            }
        }

        let mut kept = Vec::new();
        let mut appended = Vec::new();
        for (i, op) in previous.iter().enumerate() {
            if !spec_indices.contains(&i) {
                kept.push(op.clone());
                continue;
            }
            let source = op.source_abs().expect("classified above").to_path_buf();
            let refs = resolve_refs(fs, &source);
            let dirty_refs = self.any_ref_pending(fs, &previous, i, &refs)?;
            appended.push(Operation::openapi(
                source,
                swap_extension(op.destination_abs(), "json"),
                refs,
                dirty_refs,
                Rc::clone(&self.bundler),
            ));
        }
        kept.extend(appended);
        Ok(kept)
    }
}

impl OpenApiDetector {
    /// An edit to a referenced file must re-bundle the spec even when the
    /// spec file itself is byte-identical. "Pending" means some other
    /// non-delete operation reads a referenced file and would actually
    /// change something this run.
    fn any_ref_pending(
        &self,
        fs: &dyn Filesystem,
        operations: &[Operation],
        spec_index: usize,
        refs: &[PathBuf],
    ) -> Result<bool> {
        for (j, op) in operations.iter().enumerate() {
            if j == spec_index || op.name() == "delete" {
                continue;
            }
            let touches_ref = op
                .source_files()
                .iter()
                .any(|file| refs.contains(&normalize(file)));
            if touches_ref && op.has_changes(fs)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// YAML: first line opens with `openapi:` and some later line with `paths:`.
/// JSON: an object with a truthy `openapi` and a non-empty `paths`. Anything
/// unreadable or misnamed is silently not a spec.
fn is_openapi_spec(fs: &dyn Filesystem, file: &Path) -> bool {
    let Ok(text) = fs.read_string(file) else {
        return false;
    };
    if to_posix_string(file).ends_with(".json") {
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => {
                map.get("openapi").is_some_and(truthy) && map.get("paths").is_some_and(truthy)
            }
            _ => false,
        }
    } else {
        let mut lines = text.lines();
        lines.next().is_some_and(|first| first.starts_with("openapi:"))
            && lines.any(|line| line.starts_with("paths:"))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Transitively resolve `$ref`erenced files, following references through
/// referenced files too, with a visited set for cycle protection. A `$ref`
/// value is split at `#`; an empty filename part points back into the same
/// document and adds nothing.
fn resolve_refs(fs: &dyn Filesystem, spec: &Path) -> Vec<PathBuf> {
    let root = normalize(spec);
    let mut visited = HashSet::new();
    visited.insert(root.clone());
    let mut queue = vec![root.clone()];
    while let Some(file) = queue.pop() {
        let Ok(text) = fs.read_string(&file) else {
            continue;
        };
        let values = if to_posix_string(&file).ends_with(".json") {
            json_ref_values(&text)
        } else {
            yaml_ref_values(&text)
        };
        let parent = file.parent().map(Path::to_path_buf).unwrap_or_default();
        for value in values {
            let filename = value.split('#').next().unwrap_or("").trim();
            if filename.is_empty() {
                continue;
            }
            let resolved = normalize(&parent.join(filename));
            if visited.insert(resolved.clone()) {
                queue.push(resolved);
            }
        }
    }
    visited.remove(&root);
    let mut refs: Vec<PathBuf> = visited.into_iter().collect();
    refs.sort();
    refs
}

fn yaml_ref_values(text: &str) -> Vec<String> {
    let pattern = Regex::new(r#"\$ref:\s*["']?([^"'\n]+)"#).expect("static regex");
    text.lines()
        .filter_map(|line| pattern.captures(line))
        .map(|captures| captures[1].trim().to_string())
        .collect()
}

fn json_ref_values(text: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return vec![];
    };
    let mut refs = Vec::new();
    collect_json_refs(&value, &mut refs);
    refs
}

fn collect_json_refs(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "$ref" {
                    if let Value::String(target) = child {
                        refs.push(target.clone());
                    }
                }
                collect_json_refs(child, refs);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_json_refs(child, refs);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Delete detection
// ---------------------------------------------------------------------------

pub struct DeleteDetector<'a> {
    repo: String,
    index: &'a mut FileIndex,
    to_path: PathBuf,
}

impl<'a> DeleteDetector<'a> {
    pub fn new(repo: &str, index: &'a mut FileIndex, to_path: &Path) -> Self {
        Self {
            repo: repo.to_string(),
            index,
            to_path: to_path.to_path_buf(),
        }
    }
}

impl OperationDetector for DeleteDetector<'_> {
    fn detect(&mut self, _fs: &dyn Filesystem, previous: Vec<Operation>) -> Result<Vec<Operation>> {
        let mut operations = previous;
        let produced: Vec<String> = operations
            .iter()
            .flat_map(|op| op.destination_files())
            .filter_map(|destination| relative_to(destination, &self.to_path))
            .map(|rel| to_posix_string(&rel))
            .collect();

        let stale: Vec<FileIndexItem> = self
            .index
            .items()
            .iter()
            .filter(|item| item.repo == self.repo && !produced.contains(&item.file))
            .cloned()
            .collect();
        for item in stale {
            operations.push(Operation::delete(absolute(&self.to_path.join(&item.file))));
            self.index.remove(&item);
        }

        for file in produced {
            self.index.add(FileIndexItem::new(file, self.repo.clone()))?;
        }
        Ok(operations)
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Drops operations that would change nothing; the last stage, so an
/// unchanged tree yields an empty run.
pub struct FilterDetector;

impl OperationDetector for FilterDetector {
    fn detect(&mut self, fs: &dyn Filesystem, previous: Vec<Operation>) -> Result<Vec<Operation>> {
        let mut kept = Vec::new();
        for op in previous {
            if op.has_changes(fs)? {
                kept.push(op);
            }
        }
        Ok(kept)
    }
}
