//! Smoke tests for the `rampart` binary
//!
//! Every run shrinks delays with `--time-scale` so scenarios finish quickly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

const FAST: &str = "0.001";

fn rampart() -> Command {
    let mut cmd = Command::cargo_bin("rampart").unwrap();
    cmd.env("RUST_LOG", "off").arg("--time-scale").arg(FAST);
    cmd
}

#[test]
fn test_help_lists_scenarios() {
    Command::cargo_bin("rampart")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("api")
                .and(predicate::str::contains("database"))
                .and(predicate::str::contains("queue"))
                .and(predicate::str::contains("notify")),
        );
}

#[test]
fn test_api_recovers_on_third_attempt() {
    rampart()
        .arg("api")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[API] Attempt 3")
                .and(predicate::str::contains("[Retry] attempt 2"))
                .and(predicate::str::contains("[API] Final result: Data from external API"))
                .and(predicate::str::contains("Attempt 4").not()),
        );
}

#[test]
fn test_api_gives_up_when_failures_outlast_retries() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[api]\nfailures_before_success = 10").unwrap();

    rampart()
        .arg("--config")
        .arg(config.path())
        .arg("api")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[API] Attempt 4")
                .and(predicate::str::contains("Operation failed after all retries"))
                .and(predicate::str::contains("Attempt 5").not()),
        );
}

#[test]
fn test_database_breaker_opens_when_every_query_fails() {
    rampart()
        .env("RAMPART_DATABASE__FAILURE_RATE", "1.0")
        .args(["--seed", "7", "database"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[CircuitBreaker] OPEN")
                .and(predicate::str::contains("[DB] Final failure"))
                .and(predicate::str::contains("[DB] Circuit is OPEN"))
                .and(predicate::str::contains("[DB] Success").not()),
        );
}

#[test]
fn test_database_healthy_without_failures() {
    rampart()
        .env("RAMPART_DATABASE__FAILURE_RATE", "0.0")
        .arg("database")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[DB] Logical call #8")
                .and(predicate::str::contains("[DB] Success: Some data from database"))
                .and(predicate::str::contains("[CircuitBreaker]").not()),
        );
}

#[test]
fn test_queue_falls_back_when_send_is_too_slow() {
    rampart()
        .env("RAMPART_QUEUE__MIN_SEND_DELAY", "3s")
        .env("RAMPART_QUEUE__MAX_SEND_DELAY", "3s")
        .env("RAMPART_QUEUE__MESSAGES", "1")
        .arg("queue")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[Timeout] Operation timed out")
                .and(predicate::str::contains("[Fallback] Queue send failed"))
                .and(predicate::str::contains(
                    "[Queue] Final result: Message saved locally instead of queue.",
                )),
        );
}

#[test]
fn test_notify_retries_io_and_network_failures() {
    rampart()
        .arg("notify")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[FileProcessor] Attempt #4")
                .and(predicate::str::contains("[NetworkClient] Attempt #3"))
                .and(predicate::str::contains("[Main] Send result: true")),
        );
}

#[test]
fn test_notify_does_not_retry_missing_device() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[notify]\ndevice_id = \"\"").unwrap();

    rampart()
        .arg("--config")
        .arg(config.path())
        .arg("notify")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[Main] Operation failed: no device id configured")
                .and(predicate::str::contains("[NetworkClient] Attempt").not()),
        );
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[database.circuit_breaker]\nfailure_threshold = 0").unwrap();

    rampart()
        .arg("--config")
        .arg(config.path())
        .arg("database")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failure_threshold"));
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[api]\nretries = 3").unwrap();

    rampart()
        .arg("--config")
        .arg(config.path())
        .arg("api")
        .assert()
        .failure();
}

#[test]
fn test_time_scale_must_be_positive() {
    Command::cargo_bin("rampart")
        .unwrap()
        .args(["--time-scale", "0", "api"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("time-scale"));
}
