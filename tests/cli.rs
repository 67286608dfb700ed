use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::{TempDir, tempdir};

/// Isolated config and database for one CLI run
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempdir().expect("failed to create temp dir"),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.yaml")
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("engine.db")
    }

    fn write_config(&self, contents: &str) {
        fs::write(self.config_path(), contents).expect("failed to write config");
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("stowaway"));
        cmd.arg("--config")
            .arg(self.config_path())
            .arg("--database")
            .arg(self.db_path())
            .env_remove("STOWAWAY_CONFIG")
            .env_remove("STOWAWAY_DATABASE")
            .env_remove("STOWAWAY_SERVER")
            .env_remove("STOWAWAY_FORMAT");
        cmd
    }

    fn stdout(&self, args: &[&str]) -> String {
        let assert = self.cmd().args(args).assert().success();
        String::from_utf8_lossy(&assert.get_output().stdout).to_string()
    }
}

#[test]
fn status_reports_fresh_store() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();

    let stdout = ws.stdout(&["status"]);
    assert!(stdout.contains("Object store healthy"));
    assert!(stdout.contains("Sync queue empty"));
    assert!(stdout.contains(&ws.db_path().to_string_lossy().to_string()));
    assert!(ws.db_path().exists());

    Ok(())
}

#[test]
fn progress_is_recorded_and_queued() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();

    ws.cmd()
        .args(["progress", "save", "intro", r#"{"pct": 40}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded progress for 'intro'"));

    let json: serde_json::Value =
        serde_json::from_str(&ws.stdout(&["--format", "json", "progress", "list", "intro"]))?;
    assert_eq!(json["data"][0]["synced"], "");
    assert!(json["data"][0]["data"].as_str().unwrap_or("").contains("40"));

    let queue = ws.stdout(&["queue", "list"]);
    assert!(queue.contains("progress"));
    assert!(queue.contains("0/3"));

    Ok(())
}

#[test]
fn favorites_add_list_remove() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();

    ws.cmd()
        .args([
            "favorites", "add", "lesson-4", "--type", "lesson", "--title", "Lesson 4", "--url",
            "/training/4",
        ])
        .assert()
        .success();

    let listed = ws.stdout(&["favorites", "list"]);
    assert!(listed.contains("lesson-4"));
    assert!(listed.contains("Lesson 4"));

    let removed = ws.stdout(&["favorites", "remove", "lesson-4"]);
    assert!(removed.contains("Removed favorite 'lesson-4'"));

    let again = ws.stdout(&["favorites", "remove", "lesson-4"]);
    assert!(again.contains("No favorite named 'lesson-4'"));

    assert!(ws.stdout(&["favorites", "list"]).contains("No results found."));
    Ok(())
}

#[test]
fn malformed_json_argument_fails_with_message() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["track", "view", "--data", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--data is not valid JSON"));
}

#[test]
fn invalid_config_file_is_reported() {
    let ws = Workspace::new();
    ws.write_config("sync:\n  batch_size: [unterminated\n");

    ws.cmd()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse configuration"));
}

#[test]
fn offline_navigation_serves_placeholder() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();

    let stdout = ws.stdout(&[
        "--format",
        "json",
        "fetch",
        "/training/lesson-1",
        "--navigate",
        "--offline",
    ]);
    let json: serde_json::Value = serde_json::from_str(&stdout)?;
    assert_eq!(json["data"]["status"], 200);
    assert_eq!(json["data"]["source"], "placeholder");
    assert_eq!(json["data"]["strategy"], "network-first");

    Ok(())
}

#[test]
fn cache_path_prints_database_location() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            ws.db_path().to_string_lossy().to_string(),
        ));
}

#[test]
fn repair_recovers_garbage_database() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    fs::write(ws.db_path(), b"this is definitely not a sqlite database, not even close")?;

    let status = ws.stdout(&["status"]);
    assert!(status.contains("needs repair"));

    ws.cmd()
        .arg("repair")
        .assert()
        .success()
        .stdout(predicate::str::contains("Object store repaired"));

    assert!(ws.stdout(&["status"]).contains("Object store healthy"));
    Ok(())
}

#[cfg_attr(not(feature = "http-tests"), ignore)]
#[test]
fn sync_delivers_queue_to_server() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = mockito::Server::new();
    let progress = server
        .mock("POST", "/api/sync/progress")
        .with_status(200)
        .expect(1)
        .create();

    let url = server.url();
    let ws = Workspace::new();
    ws.cmd()
        .args(["--server", url.as_str(), "progress", "save", "intro", "{}"])
        .assert()
        .success();

    let stdout = ws.stdout(&["--server", url.as_str(), "sync"]);
    assert!(stdout.contains("Delivered 1"));
    progress.assert();

    assert!(ws.stdout(&["queue", "list"]).contains("No results found."));
    Ok(())
}
