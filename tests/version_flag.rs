use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with config and cache pointed at a throwaway home.
fn hookah_tui() -> (Command, TempDir) {
    let home = tempfile::tempdir().expect("temp home");
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hookah-tui"));
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_CACHE_HOME", home.path().join("cache"))
        .env_remove("RUST_LOG");
    (cmd, home)
}

#[test]
fn prints_version() {
    let (mut cmd, _home) = hookah_tui();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    let (mut cmd, _home) = hookah_tui();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hookah-TUI"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("--check-image"));
}

#[test]
fn rejects_script_image_urls() {
    let (mut cmd, _home) = hookah_tui();
    cmd.args(["--check-image", "javascript:alert(1)"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("validation: error (Invalid protocol)"))
        .stdout(predicate::str::contains("sanitized: none"))
        .stdout(predicate::str::contains("outcome: error"));
}

#[test]
fn check_image_requires_a_url() {
    let (mut cmd, _home) = hookah_tui();
    cmd.arg("--check-image")
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs a URL"));
}

#[test]
fn offline_status_reports_sample_catalog() {
    let (mut cmd, _home) = hookah_tui();
    cmd.args(["--offline", "--status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total products: 6"));
}

#[test]
fn offline_scrape_reports_products() {
    let (mut cmd, _home) = hookah_tui();
    cmd.args(["--offline", "--scrape", "demo", "bowl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scraped demo: 2 products found"))
        .stdout(predicate::str::contains("Category: bowl"));
}
