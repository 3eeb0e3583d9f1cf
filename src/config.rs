//! Config loading and validation.
//!
//! The configuration is a JSON object with a `documents` list; each entry
//! declares what to mirror and where. Validation runs in two families: root
//! checks on the whole document, then per-entry checks in a fixed order.
//! Entry failures can be downgraded to warnings with
//! `skip_invalid_documents`; root failures are always fatal.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::filesystem::Filesystem;
use crate::shape;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file `{0}` not found")]
    NotFound(String),
    #[error("Config file `{0}` is not a valid JSON file")]
    InvalidJson(String),
    #[error("Project registry `{0}` could not be loaded")]
    Registry(String),
    /// Root-level or entry-level violation, pre-rendered message.
    #[error("{0}")]
    Invalid(String),
}

/// Per-entry violation; fatal unless invalid documents are being skipped.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct DocumentError(pub String);

#[derive(Error, Debug)]
#[error("Project {0} does not exist")]
pub struct ProjectDoesNotExist(pub String);

#[derive(Debug, Clone)]
pub struct ConfigDocumentEntry {
    pub project: String,
    pub source: String,
    pub destination: String,
    pub exclude: Vec<String>,
}

/// Ordered: the first entry matching a source file wins.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub documents: Vec<ConfigDocumentEntry>,
}

// ---------------------------------------------------------------------------
// Project registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDetails {
    /// Documentation subdirectory of the project inside the destination.
    pub path: String,
}

/// Lazy view over `<destination>/projects.json`; read at most once per run.
pub struct ProjectRegistry {
    directory: PathBuf,
    projects: RefCell<Option<HashMap<String, ProjectDetails>>>,
}

impl ProjectRegistry {
    pub fn new(to_path: &Path) -> Self {
        Self {
            directory: to_path.to_path_buf(),
            projects: RefCell::new(None),
        }
    }

    /// Documentation directory for `project`, relative to the destination
    /// root. `ProjectDoesNotExist` when the id is not declared.
    pub fn doc_path(&self, fs: &dyn Filesystem, project: &str) -> Result<String> {
        self.ensure_loaded(fs)?;
        self.projects
            .borrow()
            .as_ref()
            .and_then(|projects| projects.get(project))
            .map(|details| details.path.clone())
            .ok_or_else(|| ProjectDoesNotExist(project.to_string()).into())
    }

    fn ensure_loaded(&self, fs: &dyn Filesystem) -> Result<()> {
        if self.projects.borrow().is_some() {
            return Ok(());
        }
        let registry_path = self.directory.join("projects.json");
        let loaded = fs
            .read_string(&registry_path)
            .ok()
            .and_then(|text| serde_json::from_str::<HashMap<String, ProjectDetails>>(&text).ok())
            .ok_or_else(|| ConfigError::Registry(registry_path.display().to_string()))?;
        *self.projects.borrow_mut() = Some(loaded);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

pub struct ConfigLoader<'a> {
    fs: &'a dyn Filesystem,
    from_path: PathBuf,
    registry: &'a ProjectRegistry,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(from_path: &Path, registry: &'a ProjectRegistry, fs: &'a dyn Filesystem) -> Self {
        Self {
            fs,
            from_path: from_path.to_path_buf(),
            registry,
        }
    }

    pub fn load(&self, config_path: &Path, skip_invalid_documents: bool) -> Result<Config> {
        let shown = config_path.display().to_string();
        let text = self
            .fs
            .read_string(config_path)
            .map_err(|_| ConfigError::NotFound(shown.clone()))?;
        let raw: Value =
            serde_json::from_str(&text).map_err(|_| ConfigError::InvalidJson(shown))?;

        let entries = documents_list(&raw)?;

        let mut documents = Vec::new();
        for entry in entries {
            match self.validate_entry(entry) {
                Ok(()) => documents.push(parse_entry(entry)),
                Err(err) => match err.downcast::<DocumentError>() {
                    Ok(doc_err) if skip_invalid_documents => {
                        eprintln!("Warning: {doc_err}");
                    }
                    Ok(doc_err) => return Err(ConfigError::Invalid(doc_err.to_string()).into()),
                    Err(other) => return Err(other),
                },
            }
        }
        Ok(Config { documents })
    }

    fn validate_entry(&self, entry: &Value) -> Result<()> {
        let checks: &[fn(&Self, &Value) -> Result<()>] = &[
            Self::source_key_must_exist,
            Self::source_must_be_file_or_contain_wildcard,
            Self::destination_key_must_exist,
            Self::exclude_if_present_must_be_list,
            Self::source_file_must_exist,
            Self::midway_wildcard_requires_dirish_destination,
            Self::dirish_source_requires_dirish_destination,
            Self::project_key_must_exist,
            Self::project_must_be_declared,
            Self::source_must_not_be_absolute,
            Self::destination_must_not_be_absolute,
        ];
        for check in checks {
            check(self, entry)?;
        }
        Ok(())
    }

    fn source_key_must_exist(&self, entry: &Value) -> Result<()> {
        if str_key(entry, "source").is_none() {
            return fail(format!(
                "Document rule must contain a source under `source` key. Offending config: {entry}"
            ));
        }
        Ok(())
    }

    fn source_must_be_file_or_contain_wildcard(&self, entry: &Value) -> Result<()> {
        let source = str_key(entry, "source").unwrap_or_default();
        if !shape::looks_fileish(source) && !shape::looks_wildcardish(source) {
            return fail(format!(
                "Source: `{source}` must either contain a wildcard or be a file. Offending config: {entry}"
            ));
        }
        Ok(())
    }

    fn destination_key_must_exist(&self, entry: &Value) -> Result<()> {
        if str_key(entry, "destination").is_none() {
            return fail(format!(
                "Document rule must contain a destination under `destination` key. Offending config: {entry}"
            ));
        }
        Ok(())
    }

    fn exclude_if_present_must_be_list(&self, entry: &Value) -> Result<()> {
        match entry.get("exclude") {
            None => Ok(()),
            Some(Value::Array(_)) => Ok(()),
            Some(_) => fail(format!(
                "Document rule's `exclude` key must be a list. Offending config: {entry}"
            )),
        }
    }

    /// Only meaningful for literal file paths; wildcard sources are checked
    /// against the tree at detection time instead.
    fn source_file_must_exist(&self, entry: &Value) -> Result<()> {
        let source = str_key(entry, "source").unwrap_or_default();
        if shape::looks_wildcardish(source) {
            return Ok(());
        }
        if shape::looks_fileish(source) && !self.fs.is_file(&self.from_path.join(source)) {
            return fail(format!("Source file `{source}` does not exist"));
        }
        Ok(())
    }

    fn midway_wildcard_requires_dirish_destination(&self, entry: &Value) -> Result<()> {
        let source = str_key(entry, "source").unwrap_or_default();
        let destination = str_key(entry, "destination").unwrap_or_default();
        let mut head = source.chars();
        head.next_back();
        if head.as_str().contains('*') && !shape::looks_dirish(destination) {
            return fail(format!(
                "Putting wildcards in the middle of the pattern is only supported if the destination is a directory. Offending config: {entry}"
            ));
        }
        Ok(())
    }

    fn dirish_source_requires_dirish_destination(&self, entry: &Value) -> Result<()> {
        let source = str_key(entry, "source").unwrap_or_default();
        let destination = str_key(entry, "destination").unwrap_or_default();
        if shape::looks_dirish(source) && !shape::looks_dirish(destination) {
            return fail(format!(
                "Source is a directory but destination is not. Did you forget to add a trailing slash to destination? Offending config: {entry}"
            ));
        }
        Ok(())
    }

    fn project_key_must_exist(&self, entry: &Value) -> Result<()> {
        if str_key(entry, "project").is_none() {
            return fail(format!(
                "Each document entry must contain a project name under `project` key. Offending config: {entry}"
            ));
        }
        Ok(())
    }

    fn project_must_be_declared(&self, entry: &Value) -> Result<()> {
        let project = str_key(entry, "project").unwrap_or_default();
        match self.registry.doc_path(self.fs, project) {
            Ok(_) => Ok(()),
            Err(err) if err.is::<ProjectDoesNotExist>() => fail(format!(
                "Project `{project}` is not declared in target's projects.json. Offending config: {entry}"
            )),
            Err(err) => Err(err),
        }
    }

    fn source_must_not_be_absolute(&self, entry: &Value) -> Result<()> {
        Self::path_must_not_be_absolute(entry, "source")
    }

    fn destination_must_not_be_absolute(&self, entry: &Value) -> Result<()> {
        Self::path_must_not_be_absolute(entry, "destination")
    }

    fn path_must_not_be_absolute(entry: &Value, key: &str) -> Result<()> {
        let value = str_key(entry, key).unwrap_or_default();
        if value.starts_with('/') {
            return fail(format!(
                "Path `{value}` must not be absolute. Offending config: {entry}"
            ));
        }
        Ok(())
    }
}

fn documents_list(raw: &Value) -> Result<&Vec<Value>> {
    let documents = raw.get("documents").ok_or_else(|| {
        ConfigError::Invalid(format!(
            "Config must contain a documents section under `documents` key. Offending config: {raw}"
        ))
    })?;
    documents.as_array().ok_or_else(|| {
        ConfigError::Invalid(format!(
            "Config's `documents` key must be a list. Offending config: {raw}"
        ))
        .into()
    })
}

fn parse_entry(entry: &Value) -> ConfigDocumentEntry {
    // Presence and types were checked by the validators.
    ConfigDocumentEntry {
        project: str_key(entry, "project").unwrap_or_default().to_string(),
        source: str_key(entry, "source").unwrap_or_default().to_string(),
        destination: str_key(entry, "destination").unwrap_or_default().to_string(),
        exclude: entry
            .get("exclude")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn str_key<'v>(entry: &'v Value, key: &str) -> Option<&'v str> {
    entry.get(key).and_then(Value::as_str)
}

fn fail(message: String) -> Result<()> {
    Err(DocumentError(message).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemoryFilesystem;
    use serde_json::json;

    fn fixture_fs(config: Value) -> MemoryFilesystem {
        MemoryFilesystem::with_files([
            ("/tmp/techdocs/config.json", config.to_string()),
            ("/tmp/foo/README.md", "blabla".to_string()),
            ("/tmp/foo/docs/inner/other-dir/foo.md", "blabla".to_string()),
            (
                "/tmp/bar/projects.json",
                json!({"promil": {"path": "docs/promil"}}).to_string(),
            ),
        ])
    }

    fn load(fs: &MemoryFilesystem, skip_invalid: bool) -> Result<Config> {
        let registry = ProjectRegistry::new(Path::new("/tmp/bar"));
        ConfigLoader::new(Path::new("/tmp/foo"), &registry, fs)
            .load(Path::new("/tmp/techdocs/config.json"), skip_invalid)
    }

    fn entry(source: &str, destination: &str) -> Value {
        json!({"project": "promil", "source": source, "destination": destination})
    }

    #[test]
    fn accepts_well_formed_config() {
        let fs = fixture_fs(json!({"documents": [
            entry("README.md", "docs/promil/bla.md"),
            {"project": "promil", "source": "docs/*", "destination": "docs/promil/somedir/",
             "exclude": ["docs/internal/*"]},
        ]}));
        let config = load(&fs, false).unwrap();
        assert_eq!(config.documents.len(), 2);
        assert_eq!(config.documents[0].source, "README.md");
        assert_eq!(config.documents[1].exclude, vec!["docs/internal/*".to_string()]);
    }

    #[test]
    fn rejects_absolute_destination() {
        let fs = fixture_fs(json!({"documents": [entry("docs/*", "/docs/promil/somedir/")]}));
        let err = load(&fs, false).unwrap_err();
        assert!(err.to_string().contains("must not be absolute"), "{err}");
    }

    #[test]
    fn rejects_missing_source_file() {
        let fs = fixture_fs(json!({"documents": [entry("docs/blabla", "docs/promil/somedir/")]}));
        let err = load(&fs, false).unwrap_err();
        assert!(err.to_string().contains("`docs/blabla` does not exist"), "{err}");
    }

    #[test]
    fn rejects_undeclared_project() {
        let fs = fixture_fs(json!({"documents": [
            {"project": "foo", "source": "docs/*", "destination": "docs/promil/somedir/"},
        ]}));
        let err = load(&fs, false).unwrap_err();
        assert!(err.to_string().contains("not declared in target's projects.json"), "{err}");
    }

    #[test]
    fn rejects_midway_wildcard_with_file_destination() {
        let fs = fixture_fs(json!({"documents": [
            entry("docs/**/somepath/*", "docs/promil/somedir/file.md"),
        ]}));
        let err = load(&fs, false).unwrap_err();
        assert!(err.to_string().contains("wildcards in the middle"), "{err}");
    }

    #[test]
    fn rejects_dirish_source_with_fileish_destination() {
        let fs = fixture_fs(json!({"documents": [entry("docs/*", "docs/promil/file.md")]}));
        let err = load(&fs, false).unwrap_err();
        assert!(err.to_string().contains("Source is a directory"), "{err}");
    }

    #[test]
    fn rejects_source_that_is_neither_file_nor_wildcard() {
        let fs = fixture_fs(json!({"documents": [entry("docs/", "docs/promil/somedir/")]}));
        let err = load(&fs, false).unwrap_err();
        assert!(err.to_string().contains("must either contain a wildcard or be a file"), "{err}");
    }

    #[test]
    fn skip_invalid_documents_drops_bad_entries_only() {
        let fs = fixture_fs(json!({"documents": [
            entry("README.md", "docs/promil/bla.md"),
            {"project": "foo", "source": "docs/*", "destination": "docs/promil/somedir/"},
        ]}));
        let config = load(&fs, true).unwrap();
        assert_eq!(config.documents.len(), 1);
        assert_eq!(config.documents[0].project, "promil");
    }

    #[test]
    fn root_failures_stay_fatal_even_when_skipping() {
        let fs = fixture_fs(json!({"different": []}));
        let err = load(&fs, true).unwrap_err();
        assert!(err.to_string().contains("must contain a documents section"), "{err}");

        let fs = fixture_fs(json!({"documents": {"not": "a list"}}));
        let err = load(&fs, true).unwrap_err();
        assert!(err.to_string().contains("must be a list"), "{err}");
    }

    #[test]
    fn missing_config_file_and_invalid_json() {
        let fs = MemoryFilesystem::with_files([(
            "/tmp/bar/projects.json",
            json!({"promil": {"path": "docs/promil"}}).to_string(),
        )]);
        let err = load(&fs, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Config file `/tmp/techdocs/config.json` not found"
        );

        let fs = MemoryFilesystem::with_files([
            ("/tmp/techdocs/config.json", "{not json"),
            ("/tmp/bar/projects.json", "{}"),
        ]);
        let err = load(&fs, false).unwrap_err();
        assert!(err.to_string().contains("is not a valid JSON file"), "{err}");
    }

    #[test]
    fn registry_is_read_lazily_and_cached() {
        let fs = MemoryFilesystem::with_files([(
            "/tmp/bar/projects.json",
            json!({"promil": {"path": "docs/promil"}}).to_string(),
        )]);
        let registry = ProjectRegistry::new(Path::new("/tmp/bar"));
        assert_eq!(registry.doc_path(&fs, "promil").unwrap(), "docs/promil");

        // Cached: removing the file behind the registry's back changes nothing.
        fs.delete(Path::new("/tmp/bar/projects.json")).unwrap();
        assert_eq!(registry.doc_path(&fs, "promil").unwrap(), "docs/promil");

        let err = registry.doc_path(&fs, "nope").unwrap_err();
        assert!(err.is::<ProjectDoesNotExist>());
    }

    #[test]
    fn missing_registry_is_a_config_error() {
        let fs = MemoryFilesystem::new();
        let registry = ProjectRegistry::new(Path::new("/tmp/bar"));
        let err = registry.doc_path(&fs, "promil").unwrap_err();
        assert!(err.is::<ConfigError>());
    }
}
