use assert_cmd::Command;
use once_cell::sync::Lazy;
use predicates::str::contains;
use std::env;
use std::fs::write;
use std::sync::Mutex;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn reset_env() {
    env::remove_var("SITECOMPLY_PROVIDER");
    env::remove_var("SITECOMPLY_API_KEY");
    env::remove_var("SITECOMPLY_ENDPOINT");
    env::remove_var("SITECOMPLY_MODEL");
    env::remove_var("SITECOMPLY_TIMEOUT_SECS");
    env::remove_var("SITECOMPLY_MAX_RETRIES");
}

#[test]
fn health_check_with_noop_chain() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write(file.path(), "providers:\n  - name: \"noop\"\n").unwrap();

    let mut cmd = Command::cargo_bin("sitecomply-cli").unwrap();
    cmd.args([
        "--providers-config",
        file.path().to_str().unwrap(),
        "health",
    ])
    .assert()
    .success()
    .stdout(contains("Checking provider noop"))
    .stdout(contains("ok"));
}

#[test]
fn health_without_providers_names_the_template_fallback() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    let mut cmd = Command::cargo_bin("sitecomply-cli").unwrap();
    cmd.arg("health")
        .assert()
        .success()
        .stdout(contains("deterministic template"));
}

#[test]
fn health_rejects_unknown_provider_names() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write(file.path(), "providers:\n  - name: \"oracle\"\n").unwrap();

    let mut cmd = Command::cargo_bin("sitecomply-cli").unwrap();
    cmd.args([
        "--providers-config",
        file.path().to_str().unwrap(),
        "health",
    ])
    .assert()
    .failure()
    .stderr(contains("unknown provider kind"));
}
