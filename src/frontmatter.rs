//! Frontmatter enrichment for Markdown files.
//!
//! A front block is whatever sits between the opening `---\n` and the next
//! `---\n`. There is deliberately no YAML parser here: the contract is
//! "append attributes that are missing, leave everything else byte-for-byte
//! as it was", and splitting on the delimiter is the only representation
//! that preserves the author's formatting.

use regex::Regex;

use crate::hashing::sha256_hex;

const DELIMITER: &str = "---\n";

/// An attribute inspects the current front block body and returns the lines
/// to append, or `None` when it is already present / not applicable.
pub type Attribute<'a> = Box<dyn Fn(&str) -> Option<String> + 'a>;

pub struct FrontmatterEnricher<'a> {
    original: &'a str,
    content: String,
}

impl<'a> FrontmatterEnricher<'a> {
    pub fn new(content: &'a str) -> Self {
        let normalized = if content.starts_with("---") {
            content.to_string()
        } else {
            // No front block: wrap in an empty one so attributes have a
            // place to land.
            format!("{DELIMITER}{DELIMITER}{content}")
        };
        Self {
            original: content,
            content: normalized,
        }
    }

    /// Append each attribute's lines to the front block. Returns the
    /// original text untouched when nothing was added (or when the front
    /// block never closes).
    pub fn enrich(&self, attributes: &[Attribute]) -> String {
        let mut parts: Vec<String> = self.content.split(DELIMITER).map(str::to_string).collect();
        if parts.len() < 3 {
            return self.original.to_string();
        }
        let mut added = false;
        for attribute in attributes {
            if let Some(lines) = attribute(&parts[1]) {
                parts[1].push_str(&lines);
                added = true;
            }
        }
        if added {
            parts.join(DELIMITER)
        } else {
            self.original.to_string()
        }
    }

    /// The document with its front block removed.
    pub fn strip(&self) -> String {
        let parts: Vec<&str> = self.content.split(DELIMITER).collect();
        if parts.len() < 3 {
            return self.original.to_string();
        }
        parts[2..].join(DELIMITER)
    }
}

pub fn custom_edit_url<'a>(repo: &'a str, source_rel: &'a str, branch: &'a str) -> Attribute<'a> {
    Box::new(move |current| {
        (!current.contains("custom_edit_url")).then(|| {
            format!(
                "custom_edit_url: https://github.com/PiwikPRO/{repo}/edit/{branch}/{source_rel}\n"
            )
        })
    })
}

pub fn last_update<'a>(author: &'a str) -> Attribute<'a> {
    Box::new(move |current| {
        (!current.contains("last_update")).then(|| {
            let date = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
            format!("last_update:\n  date: {date}\n  author: {author}\n")
        })
    })
}

/// Hash of a document's front block body, `None` when it has none.
pub fn frontmatter_hash(document: &str) -> Option<String> {
    document
        .starts_with("---")
        .then(|| document.split(DELIMITER).nth(1).map(|block| sha256_hex(block.as_bytes())))
        .flatten()
}

/// Hash of the *source* document's front block, so that reruns can tell
/// whether the upstream frontmatter changed. Not applicable when the source
/// has no front block of its own.
pub fn source_frontmatter_hash(source: &str) -> Attribute<'static> {
    let hash = frontmatter_hash(source);
    Box::new(move |current| match &hash {
        Some(hash) if !current.contains("x_source_frontmatter_hash") => {
            Some(format!("x_source_frontmatter_hash: {hash}\n"))
        }
        _ => None,
    })
}

/// Marker proving the destination went through enrichment.
pub fn enriched_marker() -> Attribute<'static> {
    Box::new(|current| {
        (!current.contains("x_tech_docs_enriched")).then(|| "x_tech_docs_enriched: true\n".to_string())
    })
}

/// Stored source-frontmatter hash of an enriched destination, if any.
pub fn extract_source_frontmatter_hash(destination: &str) -> Option<String> {
    let pattern = Regex::new(r"x_source_frontmatter_hash:\s([a-z0-9]+)\n").expect("static regex");
    pattern
        .captures(destination)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(lines: &str) -> Attribute<'_> {
        Box::new(move |current| (!current.contains("foo")).then(|| lines.to_string()))
    }

    #[test]
    fn enrich_wraps_documents_without_frontmatter() {
        let doc = "# foo\nbar\nbaz\n";
        let out = FrontmatterEnricher::new(doc).enrich(&[constant("foo: bar\n")]);
        assert_eq!(out, "---\nfoo: bar\n---\n# foo\nbar\nbaz\n");
    }

    #[test]
    fn enrich_appends_to_existing_frontmatter() {
        let doc = "---\nbla: bla\n---\n# foo\nbar\nbaz\n";
        let out = FrontmatterEnricher::new(doc).enrich(&[constant("foo: bar\n")]);
        assert_eq!(out, "---\nbla: bla\nfoo: bar\n---\n# foo\nbar\nbaz\n");
    }

    #[test]
    fn enrich_returns_original_bytes_when_nothing_added() {
        let doc = "---\nfoo: present\n---\nbody\n";
        let out = FrontmatterEnricher::new(doc).enrich(&[constant("foo: bar\n")]);
        assert_eq!(out, doc);
    }

    #[test]
    fn enrich_is_idempotent() {
        let doc = "# title\nbody\n";
        let attrs = || vec![enriched_marker()];
        let once = FrontmatterEnricher::new(doc).enrich(&attrs());
        let twice = FrontmatterEnricher::new(&once).enrich(&attrs());
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_removes_frontmatter() {
        let doc = "---\nbla: bla\n---\n# foo\nbar\nbaz\n";
        assert_eq!(FrontmatterEnricher::new(doc).strip(), "# foo\nbar\nbaz\n");
    }

    #[test]
    fn strip_without_frontmatter_is_identity() {
        let doc = "# foo\nbar\nbaz\n";
        assert_eq!(FrontmatterEnricher::new(doc).strip(), doc);
    }

    #[test]
    fn strip_preserves_delimiters_inside_the_body() {
        let doc = "---\na: b\n---\nbody\n---\nmore\n";
        assert_eq!(FrontmatterEnricher::new(doc).strip(), "body\n---\nmore\n");
    }

    #[test]
    fn source_hash_added_only_for_sources_with_frontmatter() {
        let doc = "---\nbla: bla\n---\n# foo\nbar\nbaz\n";
        let out = FrontmatterEnricher::new(doc).enrich(&[source_frontmatter_hash(doc)]);
        assert_eq!(
            out,
            "---\nbla: bla\nx_source_frontmatter_hash: \
             84856eef997d316c276d76c25d4caa3e467cab5bbdc5d59c3e52442a54feb15b\n---\n# foo\nbar\nbaz\n"
        );

        let plain = "# foo\nbar\nbaz\n";
        let out = FrontmatterEnricher::new(plain).enrich(&[source_frontmatter_hash(plain)]);
        assert_eq!(out, plain);
    }

    #[test]
    fn extract_stored_hash() {
        let doc = "---\nx_source_frontmatter_hash: abc123\n---\nbody\n";
        assert_eq!(extract_source_frontmatter_hash(doc).as_deref(), Some("abc123"));
        assert_eq!(extract_source_frontmatter_hash("no block"), None);
    }
}
