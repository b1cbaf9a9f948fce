//! Runs the built `jobsh` binary with piped (non-terminal) stdin.

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output, Stdio};

fn jobsh(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_jobsh"))
        .args(args)
        .env("JOBSH_LOG", "error")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn jobsh");
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(input.as_bytes())
        .expect("write input");
    child.wait_with_output().expect("wait for jobsh")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn end_of_input_exits_successfully() {
    let output = jobsh(&[], "");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn exit_builtin_exits_successfully() {
    let output = jobsh(&[], "exit\necho unreachable\n");
    assert_eq!(output.status.code(), Some(0));
    assert!(!stdout(&output).contains("unreachable"));
}

#[test]
fn help_flag_prints_usage() {
    let output = jobsh(&["--help"], "");
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("--max-jobs"));
}

#[test]
fn runs_programs_and_builtins() {
    let output = jobsh(&[], "echo hello\nhistory\ninfo\n");
    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.contains("hello\n"), "got {text:?}");
    assert!(text.contains("1: echo hello\n2: history\n"), "got {text:?}");
    assert!(text.contains("Hostname: "), "got {text:?}");
    assert!(text.contains("Current Directory: "), "got {text:?}");
}

#[test]
fn background_jobs_are_announced_and_listed() {
    let output = jobsh(&[], "sleep 1 &\njobs\n");
    let text = stdout(&output);
    let mut lines = text.lines();
    let announce = lines.next().unwrap_or_default();
    let pgid = announce
        .strip_prefix("[1] ")
        .unwrap_or_else(|| panic!("unexpected announcement {announce:?}"));
    assert!(pgid.parse::<u32>().is_ok(), "got {announce:?}");
    assert_eq!(lines.next(), Some("[1]   Running         (sleep 1)"));
}

#[test]
fn unknown_job_is_reported_on_stderr() {
    let output = jobsh(&[], "fg 5\n");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stderr), "fg: job 5 not found\n");
}

#[test]
fn exhausting_job_numbers_aborts() {
    let output = jobsh(&["--max-jobs", "2"], "sleep 1 &\nsleep 1 &\n");
    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("maximum number of jobs exceeded"),
        "got {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
}
