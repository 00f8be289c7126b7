//! Smoke tests -- verify the binary runs and each subcommand works.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn small_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[pool]
capacity = 4

[fft]
units = 2
log_n = 8

[viterbi]
units = 2

[placement]
seed = 1
"#
    )
    .unwrap();
    file
}

fn hetsched() -> Command {
    let mut cmd = Command::cargo_bin("hetsched").unwrap();
    cmd.env_remove("HETSCHED_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    hetsched()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Heterogeneous FFT / Viterbi task scheduler"));
}

#[test]
fn test_cli_version() {
    hetsched()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hetsched"));
}

#[test]
fn test_layout_reports_viterbi_rounding() {
    hetsched()
        .arg("layout")
        .assert()
        .success()
        .stdout(predicate::str::contains("viterbi"))
        .stdout(predicate::str::contains("24856"))
        .stdout(predicate::str::contains("43448"));
}

#[test]
fn test_layout_json() {
    let config = small_config();
    let output = hetsched()
        .args(["layout", "--json", "--config"])
        .arg(config.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["fft"]["in_words"], 512);
    assert_eq!(v["fft"]["out_offset_words"], 0);
    assert_eq!(v["viterbi"]["out_offset_words"], 24856);
}

#[test]
fn test_config_prints_effective_values() {
    let config = small_config();
    hetsched()
        .arg("config")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("capacity = 4"))
        .stdout(predicate::str::contains("log_n = 8"));
}

#[test]
fn test_bad_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[fft]\nhw_threshold = 500").unwrap();
    hetsched()
        .arg("config")
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure();
}

#[test]
fn test_simulated_probe() {
    let config = small_config();
    hetsched()
        .args(["probe", "--simulate", "--config"])
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("sim:fft.1"))
        .stdout(predicate::str::contains("sim:viterbi.1"));
}

#[test]
fn test_simulated_run_json() {
    let config = small_config();
    let output = hetsched()
        .args([
            "run",
            "--simulate",
            "--tasks",
            "24",
            "--producers",
            "3",
            "--viterbi-bits",
            "96",
            "--seed",
            "7",
            "--json",
            "--config",
        ])
        .arg(config.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["tasks"], 24);
    assert_eq!(report["mismatches"], 0);
    let placed: u64 = ["fft", "viterbi"]
        .iter()
        .map(|k| {
            report["placements"][k]["cpu"].as_u64().unwrap()
                + report["placements"][k]["hardware"].as_u64().unwrap()
        })
        .sum();
    assert_eq!(placed, 24);
}

#[test]
fn test_run_without_devices_is_fatal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[fft]\nunits = 1\ndevice_paths = [\"/nonexistent/fft.0\"]\n\n[viterbi]\nenabled = false"
    )
    .unwrap();
    hetsched()
        .args(["run", "--tasks", "1", "--config"])
        .arg(file.path())
        .assert()
        .code(1);
}
