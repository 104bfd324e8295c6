use std::process::Command;

#[test]
fn unknown_flag_exits_with_status_one() {
    let output = Command::new(env!("CARGO_BIN_EXE_touchline-poller"))
        .arg("--verbose")
        .output()
        .expect("binary runs");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fatal:"));
    assert!(stderr.contains("usage: touchline-poller"));
}

#[test]
fn missing_env_file_value_exits_with_status_one() {
    let output = Command::new(env!("CARGO_BIN_EXE_touchline-poller"))
        .arg("--env-file")
        .output()
        .expect("binary runs");

    assert_eq!(output.status.code(), Some(1));
}
