//! End-to-end runs of the read-only subcommands.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SMALL_MATRIX: &str = "\
matrix:
  layouts:
    - layout: raidz2
      width: 10
    - layout: mirror
      width: 2
      min_spares: 1
  frag_levels: [none, high]
  record_sizes: [1M]
  stress_profiles:
    - {cpu: none, disk: none}
    - {cpu: high, disk: med}
reliability:
  disk_afrs: [0.01, 0.05]
  multipliers: [1.0]
";

fn resilver(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_resilver"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run resilver: {e}"))
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("bench.yml");
    std::fs::write(&path, SMALL_MATRIX).unwrap_or_else(|e| panic!("write config: {e}"));
    path
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../resilver-core/tests/fixtures/status")
        .join(name)
}

#[test]
fn test_plan_lists_cases_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let out = resilver(
        dir.path(),
        &["plan", "--config", config.to_str().unwrap(), "--start", "1,0,0,0"],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let text = stdout(&out);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("[1, 0, 0, 0]"));
    assert!(lines[0].contains("mirror x2"));
    assert!(lines[3].contains("frag=high"));
    assert_eq!(lines[4], "4 of 8 cases");
}

#[test]
fn test_plan_rejects_bad_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let out = resilver(
        dir.path(),
        &["plan", "--config", config.to_str().unwrap(), "--start", "9,0,0,0"],
    );
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn test_plan_with_default_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let out = resilver(dir.path(), &["plan"]);
    assert!(out.status.success());
    assert!(stdout(&out).ends_with("672 of 672 cases\n"));
}

#[test]
fn test_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let out = resilver(dir.path(), &["run", "--dry-run", "--config", config.to_str().unwrap()]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("8 of 8 cases"));
    assert!(!dir.path().join("output.csv").exists());
    assert!(!dir.path().join("resilver.log").exists());
}

#[test]
fn test_resume_without_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = resilver(dir.path(), &["resume", "--dry-run"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("No checkpoint"));
}

#[test]
fn test_resume_dry_run_starts_at_saved_case() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    std::fs::write(
        dir.path().join("resilver-checkpoint.json"),
        r#"{"next": {"layout": 0, "frag": 1, "record_size": 0, "stress": 1}, "completed": 3}"#,
    )
    .unwrap();

    let out = resilver(dir.path(), &["resume", "--dry-run", "--config", config.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.starts_with("[0, 1, 0, 1]"));
    assert!(text.contains("5 of 8 cases"));
}

#[test]
fn test_afr_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let out = resilver(
        dir.path(),
        &[
            "afr",
            "--config",
            config.to_str().unwrap(),
            "--layout",
            "raidz2",
            "--width",
            "10",
            "--resilver",
            "13:29:31",
        ],
    );
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.starts_with("raidz2 x10, parity 2, 1 vdev(s), resilver 13h 29m 31s"));
    assert_eq!(text.matches("pool AFR").count(), 2);
}

#[test]
fn test_afr_rejects_bad_duration() {
    let dir = tempfile::tempdir().unwrap();
    let out = resilver(
        dir.path(),
        &["afr", "--layout", "raidz2", "--width", "10", "--resilver", "later"],
    );
    assert!(!out.status.success());
}

#[test]
fn test_status_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture("raidz_resilvering.txt");
    let out = resilver(dir.path(), &["status", "--file", path.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let text = stdout(&out);
    assert!(text.contains("\"state\": \"resilvering\""));
    assert!(text.contains("7.29"));
}

#[test]
fn test_status_family_mismatch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture("draid_resilvering.txt");
    let out = resilver(
        dir.path(),
        &["status", "--file", path.to_str().unwrap(), "--layout", "mirror"],
    );
    assert_eq!(out.status.code(), Some(1));
}
