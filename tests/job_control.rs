//! Job control against real processes, without a terminal.

use jobsh::env::Environment;
use jobsh::launcher;
use jobsh::parser;
use jobsh::terminal::Arbiter;
use jobsh::{JobControl, JobId, JobStatus, Registry};
use nix::unistd;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

#[derive(Clone, Default)]
struct Captured(Rc<RefCell<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Harness {
    control: JobControl,
    env: Environment,
    out: Captured,
    err: Captured,
}

impl Harness {
    fn new() -> Self {
        let out = Captured::default();
        let err = Captured::default();
        let control = JobControl::with_streams(
            Registry::default(),
            Arbiter::detached(),
            Box::new(out.clone()),
            Box::new(err.clone()),
        );
        Self {
            control,
            env: Environment::new(),
            out,
            err,
        }
    }

    /// Launches the single pipeline on `line`.
    fn run(&mut self, line: &str) -> Option<JobId> {
        let mut pipelines = parser::parse_line(line).expect("valid command line");
        assert_eq!(pipelines.len(), 1, "one pipeline per call");
        launcher::execute(&mut self.control, &self.env, pipelines.remove(0))
    }

    /// Syncs until `done` holds, for at most a few seconds.
    fn settle(&mut self, done: impl Fn(&JobControl) -> bool) -> bool {
        for _ in 0..500 {
            self.control.sync();
            if done(&self.control) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn status(&self, id: JobId) -> Option<JobStatus> {
        self.control.registry().lookup(id).map(|job| job.status())
    }

    /// Kills every remaining job and waits for the registry to empty.
    fn finish(mut self) {
        let ids: Vec<JobId> = self
            .control
            .registry()
            .for_each_listable()
            .map(|job| job.id())
            .collect();
        for id in ids {
            let _ = self.control.kill(id);
        }
        assert!(self.settle(|c| c.registry().is_empty()), "jobs left behind");
    }
}

#[test]
#[serial]
fn background_job_is_announced_and_kept() {
    let mut h = Harness::new();
    let id = h.run("sleep 5 &").expect("background job stays registered");
    assert_eq!(id, 1);

    let job = h.control.registry().lookup(id).unwrap();
    let pgid = job.pgid().expect("one member spawned");
    assert_eq!(h.out.text(), format!("[1] {pgid}\n"));
    assert_eq!(job.status(), JobStatus::Background);

    h.control.sync();
    assert!(h.control.registry().lookup(id).is_some());
    h.finish();
}

#[test]
#[serial]
fn three_stage_pipeline_shares_one_group() {
    let mut h = Harness::new();
    let id = h.run("sleep 3 | sleep 3 | sleep 3 &").unwrap();

    let job = h.control.registry().lookup(id).unwrap();
    assert_eq!(job.members().len(), 3);
    assert_eq!(job.alive(), 3);
    let pgid = job.pgid().unwrap();
    assert_eq!(pgid, job.members()[0]);
    for &member in job.members() {
        assert_eq!(unistd::getpgid(Some(member)).unwrap(), pgid);
    }
    h.finish();
}

#[test]
#[serial]
fn unresolvable_stage_is_skipped() {
    let mut h = Harness::new();
    let id = h
        .run("sleep 3 | definitely-not-a-command-jobsh | sleep 3 &")
        .unwrap();

    let job = h.control.registry().lookup(id).unwrap();
    assert_eq!(job.members().len(), 2);
    assert_eq!(job.alive(), 2);
    assert_eq!(
        h.err.text(),
        "definitely-not-a-command-jobsh: command not found\n"
    );
    h.finish();
}

#[test]
#[serial]
fn finished_foreground_job_is_released() {
    let mut h = Harness::new();
    assert_eq!(h.run("true"), None);
    assert_eq!(h.run("false | true"), None);
    assert!(h.control.registry().is_empty());
    assert_eq!(h.out.text(), "");
}

#[test]
#[serial]
fn nothing_spawned_leaves_nothing_registered() {
    let mut h = Harness::new();
    assert_eq!(h.run("definitely-not-a-command-jobsh &"), None);
    assert!(h.control.registry().is_empty());
    assert_eq!(h.out.text(), "");
}

#[test]
#[serial]
fn pipes_and_redirections_carry_data() {
    let dir = tempfile::tempdir().unwrap();
    let sorted = dir.path().join("sorted.txt");
    let mut h = Harness::new();

    h.run(&format!("printf 'b\\na\\n' | sort > {}", sorted.display()));
    assert_eq!(std::fs::read_to_string(&sorted).unwrap(), "a\nb\n");

    h.run(&format!("cat < {} >> {}", sorted.display(), sorted.display()));
    assert_eq!(std::fs::read_to_string(&sorted).unwrap(), "a\nb\na\nb\n");

    h.run(&format!("echo fresh > {}", sorted.display()));
    assert_eq!(std::fs::read_to_string(&sorted).unwrap(), "fresh\n");
    assert!(h.control.registry().is_empty());
}

#[test]
#[serial]
fn stderr_merges_into_redirected_output() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.txt");
    let mut h = Harness::new();

    h.run(&format!("sh -c 'echo oops 1>&2' >& {}", log.display()));
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "oops\n");

    h.run(&format!("sh -c 'echo piped 1>&2' |& cat > {}", log.display()));
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "piped\n");
}

#[test]
#[serial]
fn missing_input_file_is_reported() {
    let mut h = Harness::new();
    assert_eq!(h.run("cat < /nonexistent/jobsh-input"), None);
    assert!(
        h.err.text().starts_with("/nonexistent/jobsh-input: "),
        "got {:?}",
        h.err.text()
    );
}

#[test]
#[serial]
fn stopped_foreground_job_can_be_resumed() {
    let mut h = Harness::new();
    let id = h
        .run("sh -c 'kill -STOP $$; exit 3'")
        .expect("stopped job stays registered");

    assert_eq!(h.status(id), Some(JobStatus::Stopped));
    assert_eq!(
        h.out.text(),
        "\n[1]   Stopped         (sh -c kill -STOP $$; exit 3)\n"
    );

    h.control.fg(id).unwrap();
    assert!(h.control.registry().lookup(id).is_none());
    assert!(h.out.text().ends_with("sh -c kill -STOP $$; exit 3\n"));
}

#[test]
#[serial]
fn kill_terminates_the_group() {
    let mut h = Harness::new();
    let id = h.run("sleep 5 | sleep 5 &").unwrap();

    h.control.kill(id).unwrap();
    assert!(h.settle(|c| c.registry().lookup(id).is_none()));
    assert!(h.out.text().contains("Terminated"), "got {:?}", h.out.text());
}

#[test]
#[serial]
fn stop_then_bg_resumes_in_background() {
    let mut h = Harness::new();
    let id = h.run("sleep 5 &").unwrap();
    let pgid = h.control.registry().lookup(id).unwrap().pgid().unwrap();

    h.control.stop(id).unwrap();
    assert!(h.settle(|c| c
        .registry()
        .lookup(id)
        .is_some_and(|job| job.status() == JobStatus::Stopped)));
    assert!(h.out.text().contains("[1]   Stopped         (sleep 5)"));

    h.control.bg(id).unwrap();
    assert_eq!(h.status(id), Some(JobStatus::Background));
    assert!(h.out.text().ends_with(&format!("[1] {pgid}\n")));
    assert!(matches!(
        h.control.bg(id),
        Err(jobsh::ShellError::NotStopped(_))
    ));
    h.finish();
}

#[test]
#[serial]
fn listing_is_idempotent() {
    let mut h = Harness::new();
    h.run("sleep 5 &").unwrap();
    h.run("sleep 5 | cat &").unwrap();
    let before = h.out.text().len();

    h.control.jobs();
    h.control.jobs();

    let listing = "[1]   Running         (sleep 5)\n[2]   Running         (sleep 5 | cat)\n";
    assert_eq!(&h.out.text()[before..], format!("{listing}{listing}"));
    assert_eq!(h.control.registry().len(), 2);
    h.finish();
}

#[test]
#[serial]
fn ids_are_reused_after_release() {
    let mut h = Harness::new();
    let first = h.run("sleep 5 &").unwrap();
    let second = h.run("sleep 5 &").unwrap();
    assert_eq!((first, second), (1, 2));

    h.control.kill(first).unwrap();
    assert!(h.settle(|c| c.registry().lookup(first).is_none()));
    assert_eq!(h.run("sleep 5 &"), Some(1));
    h.finish();
}

#[test]
#[serial]
#[cfg(target_os = "linux")]
fn programs_start_with_default_sigpipe() {
    let dir = tempfile::tempdir().unwrap();
    let status = dir.path().join("status.txt");
    let mut h = Harness::new();

    h.run(&format!("grep SigIgn /proc/self/status > {}", status.display()));
    let text = std::fs::read_to_string(&status).unwrap();
    let mask = text
        .trim()
        .strip_prefix("SigIgn:")
        .and_then(|hex| u64::from_str_radix(hex.trim(), 16).ok())
        .unwrap_or_else(|| panic!("unexpected status line {text:?}"));
    assert_eq!(mask & (1 << (libc::SIGPIPE - 1)), 0, "SIGPIPE ignored: {mask:#x}");

    let log = dir.path().join("log.txt");
    h.run(&format!("sh -c 'yes | head -n 1' >& {}", log.display()));
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "y\n");
}
