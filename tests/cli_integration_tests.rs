//! Black-box CLI tests: drive the compiled `gog` binary against an
//! isolated config directory, no real Google endpoint involved.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    _home: TempDir,
    config_dir: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let home = TempDir::new().unwrap();
        let config_dir = home.path().join(".config").join("gogcli");
        fs::create_dir_all(&config_dir).unwrap();
        Fixture { _home: home, config_dir }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("gog").unwrap();
        cmd.env("XDG_CONFIG_HOME", self._home.path().join(".config"));
        cmd.env("GOG_KEYRING_BACKEND", "file");
        cmd.env("GOG_KEYRING_PASSWORD", "test-password");
        cmd
    }

    fn write_credentials(&self) {
        fs::write(
            self.config_dir.join("credentials.json"),
            r#"{"client_id":"id1","client_secret":"secret1"}"#,
        )
        .unwrap();
    }
}

#[test]
fn auth_list_with_no_accounts_is_friendly() {
    let fixture = Fixture::new();
    fixture
        .cmd()
        .args(["auth", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no accounts authorized"));
}

#[test]
fn auth_add_without_credentials_suggests_setup() {
    let fixture = Fixture::new();
    fixture
        .cmd()
        .args(["auth", "add", "user@example.com", "--service", "gmail", "--manual", "--timeout", "1"])
        .assert()
        .failure()
        .code(101)
        .stderr(predicate::str::contains("gog auth credentials"));
}

#[test]
fn auth_add_rejects_unknown_service() {
    let fixture = Fixture::new();
    fixture.write_credentials();
    fixture
        .cmd()
        .args(["auth", "add", "user@example.com", "--service", "bogus", "--manual", "--timeout", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown service"));
}

#[test]
fn auth_credentials_writes_flat_file() {
    let fixture = Fixture::new();
    fixture
        .cmd()
        .args([
            "auth",
            "credentials",
            "--client-id",
            "id-123",
            "--client-secret",
            "secret-456",
        ])
        .assert()
        .success();

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(fixture.config_dir.join("credentials.json")).unwrap())
            .unwrap();
    assert_eq!(written["client_id"], "id-123");
}

#[test]
fn auth_default_requires_an_existing_account() {
    let fixture = Fixture::new();
    fixture
        .cmd()
        .args(["auth", "default", "nobody@example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no token found"));
}

#[test]
fn auth_remove_missing_account_errors() {
    let fixture = Fixture::new();
    fixture
        .cmd()
        .args(["auth", "remove", "nobody@example.com"])
        .assert()
        .failure();
}
