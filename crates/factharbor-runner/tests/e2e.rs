// End-to-end tests for the fhr binary.
// Commands that talk to a server are covered by the fh-admin tests.

use std::io::Write;
use std::process::Command;

fn fhr() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fhr"))
}

#[test]
fn cli_help_displays_correctly() {
    let output = fhr().arg("--help").output().expect("failed to run fhr --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FactHarbor runner"));
    for command in ["serve", "submit", "cancel", "health", "pause", "resume", "jobs", "config"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn serve_help_shows_options() {
    let output = fhr()
        .args(["serve", "--help"])
        .output()
        .expect("failed to run fhr serve --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--log-dir"));
    assert!(stdout.contains("--ephemeral"));
    assert!(stdout.contains("--config"));
}

#[test]
fn submit_requires_class() {
    let output = fhr()
        .args(["submit", "claim"])
        .output()
        .expect("failed to run fhr submit");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--class"));
}

#[test]
fn config_template_validates() {
    let output = fhr()
        .args(["config", "template"])
        .output()
        .expect("failed to run fhr config template");
    assert!(output.status.success());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&output.stdout).unwrap();
    let output = fhr()
        .args(["config", "validate", "--config"])
        .arg(file.path())
        .output()
        .expect("failed to run fhr config validate");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn config_validate_names_bad_key() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\ntotal_slots = 0").unwrap();
    let output = fhr()
        .args(["config", "validate", "--config"])
        .arg(file.path())
        .output()
        .expect("failed to run fhr config validate");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("scheduler.total_slots"), "{stderr}");
}

#[test]
fn jobs_on_empty_store_prints_json_array() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    let store = dir.path().join("jobs.json");
    std::fs::write(
        &config,
        format!("[store]\npath = \"{}\"\n", store.display()),
    )
    .unwrap();

    let output = fhr()
        .args(["jobs", "--format", "json", "--config"])
        .arg(&config)
        .output()
        .expect("failed to run fhr jobs");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let jobs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(jobs, serde_json::json!([]));
}
