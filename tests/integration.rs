mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use common::docx_bytes;

fn crv_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("crv");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("lease.docx"),
        docx_bytes(&["Office lease", "Monthly rent is due on the first day."]),
    )
    .unwrap();
    fs::write(
        files_dir.join("lease-amended.docx"),
        docx_bytes(&["Office lease", "Monthly rent is due on the fifth day."]),
    )
    .unwrap();
    fs::write(files_dir.join("notes.txt"), "not a contract").unwrap();

    // Nothing listens on port 9, so reviews fail at the extraction stage.
    let config_content = format!(
        r#"[db]
path = "{root}/data/crv.sqlite"

[server]
bind = "127.0.0.1:7341"

[remote]
backend = "local"
local_root = "{root}/remote"
upload_dir = "/contracts/uploads"

[extraction]
endpoint = "http://127.0.0.1:9/file_parse"
connect_timeout_secs = 2

[graph]
base_url = "http://127.0.0.1:9"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("crv.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_crv(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = crv_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run crv binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

/// Uploads a file as a new draft and returns the contract id.
fn upload(config_path: &Path, file: &str) -> i64 {
    let path = files_dir(config_path).join(file);
    let (stdout, stderr, success) = run_crv(config_path, &["upload", path.to_str().unwrap()]);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    stdout
        .split_whitespace()
        .nth(1)
        .and_then(|id| id.parse().ok())
        .unwrap_or_else(|| panic!("no contract id in {:?}", stdout))
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_crv(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_crv(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_crv(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_upload_creates_draft() {
    let (_tmp, config_path) = setup_test_env();
    run_crv(&config_path, &["init"]);

    let path = files_dir(&config_path).join("lease.docx");
    let (stdout, stderr, success) = run_crv(&config_path, &["upload", path.to_str().unwrap()]);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("DRAFT-"));
    assert!(stdout.contains("lease"));
}

#[test]
fn test_upload_rejects_text_files() {
    let (_tmp, config_path) = setup_test_env();
    run_crv(&config_path, &["init"]);

    let path = files_dir(&config_path).join("notes.txt");
    let (_, stderr, success) = run_crv(&config_path, &["upload", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported file type"));
}

#[test]
fn test_duplicate_upload_conflicts() {
    let (_tmp, config_path) = setup_test_env();
    run_crv(&config_path, &["init"]);

    upload(&config_path, "lease.docx");
    let path = files_dir(&config_path).join("lease.docx");
    let (_, stderr, success) = run_crv(&config_path, &["upload", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("already uploaded"));
}

#[test]
fn test_versions_listing() {
    let (_tmp, config_path) = setup_test_env();
    run_crv(&config_path, &["init"]);
    let id = upload(&config_path, "lease.docx");

    let amended = files_dir(&config_path).join("lease-amended.docx");
    let (stdout, stderr, success) = run_crv(
        &config_path,
        &[
            "upload",
            amended.to_str().unwrap(),
            "--contract",
            &id.to_string(),
            "--remark",
            "rent date moved",
            "--user",
            "alice",
        ],
    );
    assert!(success, "version upload failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("version 2"));

    let (stdout, _, success) = run_crv(&config_path, &["versions", &id.to_string()]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("v1  lease.docx"));
    assert!(lines[0].contains("initial version"));
    assert!(lines[1].starts_with("v2  lease-amended.docx"));
    assert!(lines[1].contains("rent date moved"));
}

#[test]
fn test_versions_missing_contract() {
    let (_tmp, config_path) = setup_test_env();
    run_crv(&config_path, &["init"]);

    let (_, stderr, success) = run_crv(&config_path, &["versions", "4242"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_delete_contract() {
    let (tmp, config_path) = setup_test_env();
    run_crv(&config_path, &["init"]);
    let id = upload(&config_path, "lease.docx");

    let (stdout, stderr, success) = run_crv(&config_path, &["delete", &id.to_string()]);
    assert!(success, "delete failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1 versions"));

    let uploads = tmp.path().join("remote/contracts/uploads");
    assert_eq!(fs::read_dir(uploads).unwrap().count(), 0);

    let (_, _, success) = run_crv(&config_path, &["versions", &id.to_string()]);
    assert!(!success);
}

#[test]
fn test_review_fails_when_extraction_unreachable() {
    let (_tmp, config_path) = setup_test_env();
    run_crv(&config_path, &["init"]);
    let id = upload(&config_path, "lease.docx");

    let (stdout, stderr, success) = run_crv(
        &config_path,
        &["review", &id.to_string(), "--progress", "json"],
    );
    assert!(!success, "review should fail: stdout={}", stdout);
    assert!(stderr.contains("transport failure"));
    assert!(stderr.contains("\"step\":\"REVIEW_ALL\",\"status\":\"FAILED\""));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, _, success) = run_crv(&missing, &["init"]);
    assert!(!success);
}
