//! CLI integration tests

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// The built `qsw` binary with a clean environment
fn qsw() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_qsw"));
    command.env_clear();
    command
}

fn run(args: &[&str]) -> Output {
    qsw().args(args).output().expect("Failed to execute qsw")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn probe(from: i32, to: i32) -> Value {
    json!({
        "originalQualityIndex": from,
        "targetQualityIndex": to,
        "originalBitrate": 1500000.0,
        "targetBitrate": 2000000.0,
        "originalResolution": 921600.0,
        "targetResolution": 2073600.0,
        "networkSpeed": 5.0,
        "networkBandwidth": 40.0,
        "rtt": 50.0,
        "jitter": 4.0,
        "packetLoss": 0.01,
        "downlinkStdDev": 0.5,
        "networkQuality": "Good",
        "bufferedSeconds": 22.0,
        "videoLoadPercentile": 0.4,
        "audioLoadPercentile": 0.5,
        "devicePixelRatio": 2.0,
        "screenWidth": 1440,
        "screenHeight": 900,
        "deviceType": "desktop",
        "currentTime": 30.0,
        "duration": 300.0,
        "droppedFrames": 10,
        "totalFrames": 1000,
        "avgDecodeTime": 3.5,
        "cvActivityScore": 0.3
    })
}

fn switch_record(timestamp: i64) -> Value {
    json!({
        "sessionId": "1700000000000-k3j9x0a1b",
        "timestamp": timestamp,
        "originalQualityIndex": 2,
        "targetQualityIndex": 3,
        "originalBitrate": 1500000.0,
        "targetBitrate": 2000000.0,
        "originalResolution": 921600.0,
        "targetResolution": 2073600.0,
        "networkSpeed": 5.0,
        "networkBandwidth": 40.0,
        "rtt": 50.0,
        "jitter": 4.0,
        "packetLoss": 0.01,
        "downlinkStdDev": 0.5,
        "networkQuality": 3,
        "bufferedSeconds": 22.0,
        "videoLoadPercentile": 0.4,
        "audioLoadPercentile": 0.5,
        "devicePixelRatio": 2.0,
        "screenWidth": 1440,
        "screenHeight": 900,
        "deviceClass": "desktop",
        "currentTime": 30.0,
        "duration": 300.0,
        "droppedFrames": 10,
        "totalFrames": 1000,
        "avgDecodeTime": 3.5,
        "cvActivityScore": 0.3,
        "switchStartTime": 100.0,
        "switchEndTime": 350.0,
        "timeToPlay": 250.0,
        "bitrateRatio": 1.3333333333333333,
        "estimatedLoadTime": 0.25,
        "success": true,
        "rebuffered": false,
        "rebufferDuration": 0.0,
        "droppedFramesAfter": 0
    })
}

fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

#[test]
fn test_cli_help() {
    let output = run(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("quality-switch"), "Should show app description");
    for command in ["features", "predict", "recommend", "flush"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

#[test]
fn test_cli_version() {
    let output = run(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("qsw"));
}

#[test]
fn test_flush_help_lists_options() {
    let output = run(&["flush", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--endpoint"));
    assert!(stdout.contains("--user"));
}

#[test]
fn test_help_shows_env_vars() {
    let flush = run(&["flush", "--help"]);
    assert!(String::from_utf8_lossy(&flush.stdout).contains("QSW_TELEMETRY_ENDPOINT"));

    let predict = run(&["predict", "--help"]);
    assert!(String::from_utf8_lossy(&predict.stdout).contains("QSW_MODEL_LOCATION"));
}

#[test]
fn test_features_json() {
    let dir = TempDir::new().unwrap();
    let path = write_json(dir.path(), "probe.json", &probe(2, 3));

    let output = run(&["features", path.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report = stdout_json(&output);
    assert_eq!(report["schemaVersion"], 1);
    assert_eq!(report["values"].as_array().unwrap().len(), 21);
    assert_eq!(report["features"]["quality_delta"], 1.0);
    assert_eq!(report["features"]["network_speed"], 5.0);
    assert_eq!(report["values"][0], 5.0);
}

#[test]
fn test_features_rejects_invalid_probe() {
    let dir = TempDir::new().unwrap();
    let path = write_json(dir.path(), "probe.json", &probe(3, 3));

    let output = run(&["features", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid probe"));
}

#[test]
fn test_predict_uses_heuristic_without_model() {
    let dir = TempDir::new().unwrap();
    let path = write_json(dir.path(), "probe.json", &probe(2, 3));

    let output = run(&["predict", path.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report = stdout_json(&output);
    assert_eq!(report["targetQualityIndex"], 3);
    assert_eq!(report["shouldSwitch"], true);
    assert_eq!(report["confidence"], 0.70);
    assert_eq!(report["usedML"], false);
    assert!(report["modelVersion"].is_null());
}

#[test]
fn test_predict_falls_back_when_model_missing() {
    let dir = TempDir::new().unwrap();
    let path = write_json(dir.path(), "probe.json", &probe(1, 4));
    let model_dir = dir.path().join("no-model-here");

    let output = run(&[
        "predict",
        path.to_str().unwrap(),
        "--model",
        model_dir.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report = stdout_json(&output);
    assert_eq!(report["shouldSwitch"], false);
    assert_eq!(report["usedML"], false);
}

#[test]
fn test_recommend_picks_first_approved_candidate() {
    let dir = TempDir::new().unwrap();
    let mut invalid = probe(2, 1);
    invalid["networkSpeed"] = Value::Null;
    let path = write_json(
        dir.path(),
        "probes.json",
        &json!([probe(1, 4), probe(2, 3), invalid]),
    );

    let output = run(&["recommend", path.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report = stdout_json(&output);
    assert_eq!(report["recommended"], 3);
    assert_eq!(report["skipped"], 1);
    assert_eq!(report["candidates"].as_array().unwrap().len(), 2);
    assert_eq!(report["candidates"][0]["targetQualityIndex"], 3);
}

#[test]
fn test_flush_delivers_spill_file() {
    let dir = TempDir::new().unwrap();
    let spill = write_json(
        dir.path(),
        "spill.json",
        &json!([switch_record(1), switch_record(2)]),
    );

    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/telemetry")
        .match_body(mockito::Matcher::PartialJson(json!({
            "user": "alice",
            "version": "1.0"
        })))
        .with_status(202)
        .create();

    let endpoint = format!("{}/api/telemetry", server.url());
    let output = run(&[
        "flush",
        spill.to_str().unwrap(),
        "--endpoint",
        &endpoint,
        "--user",
        "@alice",
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary = stdout_json(&output);
    assert_eq!(summary["loaded"], 2);
    assert_eq!(summary["sent"], 2);
    assert_eq!(summary["spilled"], 0);

    mock.assert();
    assert!(!spill.exists());
}

#[test]
fn test_flush_failure_writes_records_back() {
    let dir = TempDir::new().unwrap();
    let spill = write_json(dir.path(), "spill.json", &json!([switch_record(7)]));

    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/telemetry")
        .with_status(503)
        .create();

    let endpoint = format!("{}/api/telemetry", server.url());
    let output = run(&["flush", spill.to_str().unwrap(), "--endpoint", &endpoint]);

    assert!(!output.status.success());
    mock.assert();

    let restored: Value = serde_json::from_str(&std::fs::read_to_string(&spill).unwrap()).unwrap();
    assert_eq!(restored.as_array().unwrap().len(), 1);
    assert_eq!(restored[0]["timestamp"], 7);
}

#[test]
fn test_flush_requires_endpoint() {
    let dir = TempDir::new().unwrap();
    let spill = write_json(dir.path(), "spill.json", &json!([switch_record(1)]));

    let output = run(&["flush", spill.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--endpoint"));
    assert!(spill.exists());
}

#[test]
fn test_flush_reads_endpoint_from_environment() {
    let dir = TempDir::new().unwrap();
    let spill = write_json(dir.path(), "spill.json", &json!([switch_record(3)]));

    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/telemetry")
        .with_status(200)
        .create();

    let output = qsw()
        .args(["flush", spill.to_str().unwrap(), "--verbose"])
        .env(
            "QSW_TELEMETRY_ENDPOINT",
            format!("{}/api/telemetry", server.url()),
        )
        .output()
        .expect("Failed to execute qsw");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "{stderr}");
    assert!(stderr.contains("Flushing spilled telemetry"), "{stderr}");
    mock.assert();
    assert!(!spill.exists());
}

#[test]
fn test_predict_verbose_logs_model_fallback() {
    let dir = TempDir::new().unwrap();
    let path = write_json(dir.path(), "probe.json", &probe(2, 3));

    let output = qsw()
        .args(["predict", path.to_str().unwrap(), "--verbose", "--format", "json"])
        .env("QSW_MODEL_LOCATION", dir.path().join("missing"))
        .output()
        .expect("Failed to execute qsw");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "{stderr}");
    assert!(stderr.contains("Model load failed, using heuristic"), "{stderr}");
    assert_eq!(stdout_json(&output)["usedML"], false);
}
