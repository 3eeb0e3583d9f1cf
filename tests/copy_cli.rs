//! Smoke tests driving the compiled binary end to end on a real directory
//! tree.

use serde_json::json;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn seed(root: &Path) {
    write(root, "src/README.md", "readme");
    write(root, "src/docs/one.md", "one");
    write(root, "src/docs/two.txt", "two");
    write(
        root,
        "dst/projects.json",
        &json!({"promil": {"path": "docs/promil"}}).to_string(),
    );
    write(
        root,
        "config.json",
        &json!({"documents": [
            {"project": "promil", "source": "README.md", "destination": "bla.md"},
            {"project": "promil", "source": "docs/*", "destination": "somedir/",
             "exclude": ["docs/*.txt"]},
        ]})
        .to_string(),
    );
}

fn copy_cmd(root: &Path, extra: &[&str]) -> std::process::Output {
    let bin = env!("CARGO_BIN_EXE_techdocs");
    Command::new(bin)
        .arg("copy")
        .args(["--from", root.join("src").to_str().unwrap()])
        .args(["--to", root.join("dst").to_str().unwrap()])
        .args(["--config", root.join("config.json").to_str().unwrap()])
        .args(["--index", "promil"])
        .args(extra)
        .output()
        .expect("spawn techdocs copy")
}

#[test]
fn copy_mirrors_and_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path());

    let output = copy_cmd(tmp.path(), &[]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[COPY]"), "stdout: {stdout}");

    let bla = std::fs::read_to_string(tmp.path().join("dst/docs/promil/bla.md")).unwrap();
    assert!(bla.contains("x_tech_docs_enriched: true"));
    assert!(bla.contains("custom_edit_url: https://github.com/PiwikPRO/src/edit/master/README.md"));
    assert!(tmp.path().join("dst/docs/promil/somedir/one.md").is_file());
    assert!(!tmp.path().join("dst/docs/promil/somedir/two.txt").exists());

    // One index item per produced file, under the repo label.
    let index_dir = tmp.path().join("dst/.index/promil");
    assert_eq!(std::fs::read_dir(&index_dir).unwrap().count(), 2);

    // Unchanged inputs: the second run has nothing to do.
    let rerun = copy_cmd(tmp.path(), &[]);
    assert!(rerun.status.success());
    assert!(
        String::from_utf8_lossy(&rerun.stderr).contains("Nothing to do"),
        "stderr: {}",
        String::from_utf8_lossy(&rerun.stderr)
    );
}

#[test]
fn dry_run_plans_but_mutates_nothing() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path());

    let output = copy_cmd(tmp.path(), &["--dry-run"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[COPY]"), "stdout: {stdout}");

    assert!(!tmp.path().join("dst/docs/promil").exists());
    assert!(!tmp.path().join("dst/.index").exists());
}

#[test]
fn missing_config_reports_and_exits_one() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path());
    std::fs::remove_file(tmp.path().join("config.json")).unwrap();

    let output = copy_cmd(tmp.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&output.stdout).contains("Config file load error:"),
        "stdout: {}",
        String::from_utf8_lossy(&output.stdout)
    );
}

#[test]
fn invalid_entries_can_be_skipped() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path());
    write(
        tmp.path(),
        "config.json",
        &json!({"documents": [
            {"project": "promil", "source": "README.md", "destination": "bla.md"},
            {"project": "not-registered", "source": "docs/*", "destination": "somedir/"},
        ]})
        .to_string(),
    );

    // Without the flag the bad entry is fatal.
    let strict = copy_cmd(tmp.path(), &[]);
    assert_eq!(strict.status.code(), Some(1));

    let lenient = copy_cmd(tmp.path(), &["--skip-invalid-documents"]);
    assert!(lenient.status.success());
    assert!(
        String::from_utf8_lossy(&lenient.stderr).contains("Warning:"),
        "stderr: {}",
        String::from_utf8_lossy(&lenient.stderr)
    );
    assert!(tmp.path().join("dst/docs/promil/bla.md").is_file());
}
