//! Helpers for driving the `pipe-sieve` binary

use crossbeam_channel::{bounded, RecvTimeoutError};
use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

/// Path of the binary under test
pub fn sieve_bin() -> &'static str {
    env!("CARGO_BIN_EXE_pipe-sieve")
}

/// Run `f` on a helper thread, failing the test if it takes longer than `timeout`
pub fn with_timeout<T, F>(timeout: Duration, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(value) => value,
        Err(RecvTimeoutError::Timeout) => panic!("pipeline did not finish within {:?}", timeout),
        Err(RecvTimeoutError::Disconnected) => panic!("pipeline runner panicked"),
    }
}

/// Run the binary with `args`, capturing stdout and stderr
pub fn run_sieve(args: &[&str]) -> Output {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    with_timeout(super::test_timeout(), move || {
        Command::new(sieve_bin())
            .args(&args)
            .env("RUST_LOG", "warn")
            .output()
            .expect("failed to run pipe-sieve")
    })
}

/// Run a single stage process with raw bytes on stdin
pub fn run_stage(args: &[&str], stdin: Vec<u8>) -> Output {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    with_timeout(super::test_timeout(), move || {
        let mut child = Command::new(sieve_bin())
            .arg("stage")
            .args(&args)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn stage");

        let mut input = child.stdin.take().expect("stdin piped");
        input.write_all(&stdin).expect("failed to feed stage");
        drop(input);

        child.wait_with_output().expect("failed to wait for stage")
    })
}

/// Encode values the way stages expect them
pub fn encode(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}
