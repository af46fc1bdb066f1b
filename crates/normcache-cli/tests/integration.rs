//! Integration tests for the normcache CLI
//!
//! Every command runs with `HOME` and the working directory pointed at a
//! fresh temp dir, so no user config leaks in. The demo link keeps them
//! offline.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A normcache command isolated in `dir`
#[allow(deprecated)]
fn normcache_in(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("normcache").expect("Failed to find normcache binary");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env_remove("RUST_LOG")
        .env_remove("NORMCACHE_URI")
        .env_remove("NORMCACHE_LINK")
        .env_remove("NORMCACHE_CONFIG");
    cmd
}

#[test]
fn test_demo_runs_scenario() {
    let temp = TempDir::new().unwrap();

    normcache_in(&temp)
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("query entries from cache"))
        .stdout(predicate::str::contains("entries watchQuery (search 1)"))
        .stdout(predicate::str::contains("entries watchQuery (search 2)"))
        .stdout(predicate::str::contains("removeEntryFailed"))
        .stdout(predicate::str::contains("Entry:2"))
        .stderr(predicate::str::contains("Request started!"))
        .stderr(predicate::str::contains("removeEntryFailed rejected"));
}

#[test]
fn test_demo_metrics() {
    let temp = TempDir::new().unwrap();

    normcache_in(&temp)
        .args(["--quiet", "demo", "--metrics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"commits\": 1"))
        .stdout(predicate::str::contains("\"rollbacks\": 1"))
        .stdout(predicate::str::contains("watchQuery").not());
}

#[test]
fn test_query_network_only() {
    let temp = TempDir::new().unwrap();

    normcache_in(&temp)
        .args(["query", "--search", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""slot": "entries({\"search\":\"2\"})""#))
        .stdout(predicate::str::contains("\"source\": \"network\""));
}

#[test]
fn test_query_cache_only_is_a_miss() {
    let temp = TempDir::new().unwrap();

    normcache_in(&temp)
        .args(["query", "--policy", "cache-only", "--show-cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"data\": null"));
}

#[test]
fn test_config_init_then_show() {
    let temp = TempDir::new().unwrap();

    normcache_in(&temp)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains(".normcache/config.toml"));
    assert!(temp.path().join(".normcache/config.toml").exists());

    normcache_in(&temp)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gc_after_mutation = true"))
        .stdout(predicate::str::contains("kind = \"demo\""));
}

#[test]
fn test_config_get_with_override() {
    let temp = TempDir::new().unwrap();

    normcache_in(&temp)
        .args(["--uri", "http://example.test:4000/", "config", "get", "link.kind"])
        .assert()
        .success()
        .stdout(predicate::str::diff("http\n"));
}

#[test]
fn test_config_get_unknown_key() {
    let temp = TempDir::new().unwrap();

    normcache_in(&temp)
        .args(["config", "get", "link.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_local_config_is_used() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join(".normcache")).unwrap();
    std::fs::write(
        temp.path().join(".normcache/config.toml"),
        "[link]\ntimeout_secs = 7\n",
    )
    .unwrap();

    normcache_in(&temp)
        .args(["config", "get", "link.timeout_secs"])
        .assert()
        .success()
        .stdout(predicate::str::diff("7\n"));
}

#[test]
fn test_explicit_config_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("custom.toml");
    std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();

    normcache_in(&temp)
        .arg("--config")
        .arg(&path)
        .args(["config", "get", "logging.level"])
        .assert()
        .success()
        .stdout(predicate::str::diff("warn\n"));
}

#[test]
fn test_invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join(".normcache")).unwrap();
    std::fs::write(
        temp.path().join(".normcache/config.toml"),
        "[link]\ntimeout_secs = 0\n",
    )
    .unwrap();

    normcache_in(&temp)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("link.timeout_secs"));
}
