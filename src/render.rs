//! Rendering blackboxes: PlantUML and OpenAPI tooling behind narrow traits.
//!
//! Operations only ever see the traits; tests plug in canned renderers and
//! production wires up the subprocess-backed implementations below. Both
//! spawn blocking children and turn a failed child into a run-ending error.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// `.puml` text in, SVG document out.
pub trait PlantUmlRenderer {
    fn render(&self, puml: &str) -> Result<String>;
}

/// OpenAPI spec path in, bundled JSON text out.
pub trait OpenApiBundler {
    fn bundle(&self, spec: &Path) -> Result<String>;
}

/// Renders diagrams through the official PlantUML container, feeding the
/// source on stdin so no host-side PlantUML install is needed.
pub struct DockerPlantUmlRenderer {
    image: String,
}

impl DockerPlantUmlRenderer {
    pub fn new() -> Self {
        Self {
            image: "plantuml/plantuml".to_string(),
        }
    }
}

impl Default for DockerPlantUmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlantUmlRenderer for DockerPlantUmlRenderer {
    fn render(&self, puml: &str) -> Result<String> {
        let mut child = Command::new("docker")
            .args(["run", "--rm", "-i", &self.image, "-tsvg", "-pipe"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning the PlantUML container")?;
        child
            .stdin
            .as_mut()
            .context("PlantUML container stdin")?
            .write_all(puml.as_bytes())
            .context("feeding the diagram to PlantUML")?;
        let output = child.wait_with_output().context("waiting for PlantUML")?;
        if !output.status.success() {
            bail!(
                "PlantUML rendering failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let svg = String::from_utf8(output.stdout).context("PlantUML produced non-UTF-8 output")?;
        if svg.is_empty() {
            bail!("PlantUML produced no output");
        }
        Ok(svg)
    }
}

/// Bundles multi-file specs into one JSON document via `@redocly/cli`.
pub struct RedoclyBundler;

impl OpenApiBundler for RedoclyBundler {
    fn bundle(&self, spec: &Path) -> Result<String> {
        let output = Command::new("npx")
            .args(["--yes", "@redocly/cli", "bundle"])
            .arg(spec)
            .args(["--ext", "json"])
            .stdin(Stdio::null())
            .output()
            .context("spawning the OpenAPI bundler")?;
        if !output.status.success() {
            bail!(
                "OpenAPI bundling of {} failed ({}): {}",
                spec.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        String::from_utf8(output.stdout).context("bundler produced non-UTF-8 output")
    }
}
