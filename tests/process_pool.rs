#![cfg(unix)]

use std::process::Command;

use serde_json::Value;

/// Runs `procvisor <args> exercise` with fast timings and returns its report.
fn exercise(args: &[&str]) -> Value {
    let output = Command::new(env!("CARGO_BIN_EXE_procvisor"))
        .args(args)
        .arg("exercise")
        .env("PROCVISOR_RESTART_BACKOFF_MS", "100")
        .env("PROCVISOR_POLL_INTERVAL_MS", "200")
        .env("PROCVISOR_GRACE_MS", "5000")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run the procvisor binary");
    assert!(
        output.status.success(),
        "exit status {:?}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("report is not JSON")
}

#[test]
fn exercise_against_worker_processes() {
    let report = exercise(&["--workers", "1", "--unit", "process"]);
    assert_eq!(report["echo"], "hello");
    assert_eq!(report["concurrent_calls"], 16);
    assert_eq!(report["error"]["Failed"]["kind"], "demo_failure");
    assert_eq!(report["error"]["Failed"]["message"], "requested failure");
    assert_eq!(report["rejected"]["Rejected"]["middleware"], "token_gate");
    assert_eq!(report["authorized_as"], "operator");

    let waited = report["timed_out_after_ms"].as_u64().unwrap();
    assert!((300..1_200).contains(&waited), "waited {waited}ms");

    // The crash replaced the worker process and its global context.
    assert_eq!(report["restarted"], true);
    assert_eq!(report["before_crash"]["worker"], "command_processor_0");
    assert_eq!(report["after_crash"]["attempt"], report["before_crash"]["attempt"].as_u64().unwrap() + 1);
    assert_ne!(report["after_crash"]["pid"], report["before_crash"]["pid"]);
    assert_ne!(report["before_crash"]["pid"].as_u64().unwrap(), u64::from(std::process::id()));
    assert_eq!(report["startup_failures"], 0);
    assert_eq!(report["worker_failures"], 1);
}

#[test]
fn failed_process_startup_is_reported_and_retried() {
    let report = exercise(&["--workers", "1", "--unit", "process", "--fail-startups", "1"]);

    // Attempt 1 failed before readiness and was retried as a startup failure,
    // not restarted as a worker failure.
    assert_eq!(report["startup_failures"], 1);
    assert_eq!(report["worker_failures"], 1);
    assert_eq!(report["before_crash"]["attempt"], 2);
    assert_eq!(report["after_crash"]["attempt"], 3);
    assert_eq!(report["restarted"], true);
    assert_eq!(report["echo"], "hello");
}

#[test]
fn crash_is_matched_to_the_worker_that_took_it() {
    let report = exercise(&["--workers", "2", "--unit", "process"]);
    assert_eq!(report["restarted"], true);
    assert_eq!(report["before_crash"]["worker"], report["after_crash"]["worker"]);
    assert_eq!(report["worker_failures"], 1);
}

#[test]
fn version_flag_prints_the_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_procvisor"))
        .arg("--version")
        .output()
        .expect("failed to run the procvisor binary");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}
