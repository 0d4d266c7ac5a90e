//! Integration tests for `tl cache` and `tl issue`.

mod common;

use common::{TestEnv, parse_json};
use predicates::prelude::*;

fn write_cache(env: &TestEnv, timestamp: i64) {
    std::fs::create_dir_all(env.data_path()).unwrap();
    let document = serde_json::json!({
        "issues": {
            "ABC-1": {
                "issue": {
                    "id": "10001",
                    "key": "ABC-1",
                    "summary": "Cached summary",
                    "status": "In Progress",
                    "assignee": "Ada",
                    "type": "Story",
                    "priority": "High"
                },
                "timestamp": timestamp
            }
        },
        "subIssues": {
            "ABC-1": { "items": [], "timestamp": timestamp }
        }
    });
    std::fs::write(env.data_path().join("cache.json"), document.to_string()).unwrap();
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[test]
fn test_cache_stats_empty() {
    let env = TestEnv::new();

    let output = env.tl().args(["cache", "stats"]).output().unwrap();
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    assert_eq!(json["persistent_issues"], 0);
    assert_eq!(json["enabled"], true);
    assert_eq!(json["duration_secs"], 86400);
}

#[test]
fn test_cache_clear() {
    let env = TestEnv::new();
    write_cache(&env, now_millis());

    env.tl()
        .args(["-H", "cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 1 issues"));

    let output = env.tl().args(["cache", "stats"]).output().unwrap();
    let json = parse_json(&output.stdout);
    assert_eq!(json["persistent_issues"], 0);
    assert_eq!(json["persistent_sub_issues"], 0);
}

#[test]
fn test_corrupt_cache_is_treated_as_empty() {
    let env = TestEnv::new();
    std::fs::create_dir_all(env.data_path()).unwrap();
    std::fs::write(env.data_path().join("cache.json"), "{not json").unwrap();

    let output = env.tl().args(["cache", "stats"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(parse_json(&output.stdout)["persistent_issues"], 0);
}

#[test]
fn test_issue_served_from_persistent_cache() {
    let env = TestEnv::new();
    write_cache(&env, now_millis());

    env.tl()
        .args(["-H", "issue", "ABC-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("📖 ABC-1 - Cached summary"))
        .stdout(predicate::str::contains("Assignee: Ada"));
}

#[test]
fn test_issue_expired_cache_entry_is_a_miss() {
    let env = TestEnv::new();
    // Two days old, past the default one-day duration
    write_cache(&env, now_millis() - 2 * 86_400_000);

    env.tl()
        .args(["issue", "ABC-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not be resolved"));
}

#[test]
fn test_issue_cache_disabled_skips_persistent_tier() {
    let env = TestEnv::new();
    write_cache(&env, now_millis());
    env.write_config("cache-enabled #false\n");

    env.tl()
        .args(["issue", "ABC-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));
}
