//! Transport-only child-process execution.
//!
//! Every external command this crate runs — git, the executor, and
//! configured `commands.*` — funnels through the two primitives here.
//! Neither primitive interprets output; callers decide what a captured
//! stdout/stderr pair means.

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AutoCodexError, ProcessFailure};

/// What to do when a captured command exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Return `Err` with the captured `ProcessFailure`.
    Raise,
    /// Return `Ok` regardless of exit code; caller inspects `exit_code`.
    Return,
}

/// Input to either run primitive.
pub struct RunSpec<'a> {
    pub argv: &'a [&'a str],
    pub cwd: Option<&'a std::path::Path>,
    pub env: &'a [(&'a str, &'a str)],
    pub timeout: Option<Duration>,
    pub on_failure: OnFailure,
    /// Bytes written to the child's stdin before the pipe is closed.
    /// `None` leaves stdin as `/dev/null` (the common case for `git`
    /// and configured `commands.*`); the executor invocation is the one
    /// caller that sets this, to carry its prompt.
    pub stdin: Option<&'a [u8]>,
}

/// Result of a captured run.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

fn build_command(spec: &RunSpec) -> Command {
    let mut cmd = Command::new(spec.argv[0]);
    cmd.args(&spec.argv[1..]);
    if let Some(cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in spec.env {
        cmd.env(k, v);
    }
    cmd
}

/// Writes `stdin` to the child and closes the pipe. A child that exits
/// before reading it closes the pipe from its side first; that's not
/// our failure to report, so a broken-pipe write error is swallowed.
fn feed_stdin(child: &mut std::process::Child, stdin: Option<&[u8]>) {
    if let Some(bytes) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            let _ = pipe.write_all(bytes);
        }
    }
}

fn trace(context: &str, argv: &[&str], dur: Duration, ok: bool) {
    log::debug!(
        "[acdx-trace] context={context} cmd=\"{}\" dur={:.1}ms ok={ok}",
        argv.join(" "),
        dur.as_secs_f64() * 1000.0
    );
}

/// Run a command to completion, capturing stdout/stderr. If `timeout`
/// is set and exceeded, the child is killed and `timed_out` is `true`
/// (counted as a failure regardless of `on_failure`).
pub fn run_capture(context: &str, spec: RunSpec) -> Result<CapturedOutput, AutoCodexError> {
    let started = Instant::now();
    let mut cmd = build_command(&spec);
    cmd.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(AutoCodexError::from)?;
    feed_stdin(&mut child, spec.stdin);

    let timed_out = if let Some(timeout) = spec.timeout {
        match child
            .wait_timeout(timeout)
            .map_err(AutoCodexError::from)?
        {
            Some(_status) => false,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                true
            }
        }
    } else {
        false
    };

    let output = child.wait_with_output().map_err(AutoCodexError::from)?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code();
    let ok = !timed_out && output.status.success();
    trace(context, spec.argv, started.elapsed(), ok);

    if timed_out {
        return Err(AutoCodexError::Process(ProcessFailure {
            argv: spec.argv.iter().map(|s| s.to_string()).collect(),
            exit_code: None,
            stdout,
            stderr: format!("timed out after {:?}", timeout_of(&spec)),
        }));
    }

    if !ok && spec.on_failure == OnFailure::Raise {
        return Err(AutoCodexError::Process(ProcessFailure {
            argv: spec.argv.iter().map(|s| s.to_string()).collect(),
            exit_code,
            stdout,
            stderr,
        }));
    }

    Ok(CapturedOutput { exit_code, stdout, stderr, timed_out })
}

fn timeout_of(spec: &RunSpec) -> Duration {
    spec.timeout.unwrap_or_default()
}

/// Run a command, mirroring stdout/stderr line-by-line to `log_path`
/// as it runs, while also returning the full captured text. Used for
/// the executor invocation and any `commands.test_shell` run where a
/// human may want to watch the log file grow live.
pub fn run_stream_to_log(
    context: &str,
    spec: RunSpec,
    log_path: &std::path::Path,
) -> Result<CapturedOutput, AutoCodexError> {
    let started = Instant::now();
    let mut cmd = build_command(&spec);
    cmd.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut log_file = std::fs::File::create(log_path)?;
    writeln!(log_file, "cwd: {}", spec.cwd.map(|p| p.display().to_string()).unwrap_or_else(|| ".".into()))?;
    writeln!(log_file, "$ {}", spec.argv.join(" "))?;
    log_file.flush()?;
    let log_file = Arc::new(Mutex::new(log_file));

    let mut child = cmd.spawn().map_err(AutoCodexError::from)?;
    feed_stdin(&mut child, spec.stdin);
    let stdout_pipe = child.stdout.take().expect("piped stdout");
    let stderr_pipe = child.stderr.take().expect("piped stderr");

    let stdout_buf = Arc::new(Mutex::new(String::new()));
    let stderr_buf = Arc::new(Mutex::new(String::new()));

    let stdout_thread = spawn_mirror_thread(stdout_pipe, log_file.clone(), stdout_buf.clone());
    let stderr_thread = spawn_mirror_thread(stderr_pipe, log_file.clone(), stderr_buf.clone());

    let timed_out = Arc::new(AtomicBool::new(false));
    let status = if let Some(timeout) = spec.timeout {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait().map_err(AutoCodexError::from)? {
                Some(status) => break Some(status),
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let status = child.wait().ok();
                    timed_out.store(true, Ordering::SeqCst);
                    break status;
                }
                None => thread::sleep(Duration::from_millis(25)),
            }
        }
    } else {
        Some(child.wait().map_err(AutoCodexError::from)?)
    };

    let _ = stdout_thread.join();
    let _ = stderr_thread.join();

    let stdout = stdout_buf.lock().unwrap().clone();
    let stderr = stderr_buf.lock().unwrap().clone();
    let exit_code = status.and_then(|s| s.code());
    let timed_out = timed_out.load(Ordering::SeqCst);
    let ok = !timed_out && status.map(|s| s.success()).unwrap_or(false);
    trace(context, spec.argv, started.elapsed(), ok);

    if timed_out {
        return Err(AutoCodexError::Process(ProcessFailure {
            argv: spec.argv.iter().map(|s| s.to_string()).collect(),
            exit_code: None,
            stdout,
            stderr: "timed out".to_string(),
        }));
    }

    if !ok && spec.on_failure == OnFailure::Raise {
        return Err(AutoCodexError::Process(ProcessFailure {
            argv: spec.argv.iter().map(|s| s.to_string()).collect(),
            exit_code,
            stdout,
            stderr,
        }));
    }

    Ok(CapturedOutput { exit_code, stdout, stderr, timed_out })
}

fn spawn_mirror_thread(
    pipe: impl std::io::Read + Send + 'static,
    log_file: Arc<Mutex<std::fs::File>>,
    buf: Arc<Mutex<String>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            buf.lock().unwrap().push_str(&line);
            buf.lock().unwrap().push('\n');
            if let Ok(mut f) = log_file.lock() {
                let _ = writeln!(f, "{line}");
            }
        }
    })
}

/// Extension trait bridging `wait_timeout`'s external crate API onto
/// `std::process::Child` without requiring callers to import the crate
/// directly.
trait WaitTimeoutExt {
    fn wait_timeout(&mut self, dur: Duration) -> std::io::Result<Option<std::process::ExitStatus>>;
}

impl WaitTimeoutExt for std::process::Child {
    fn wait_timeout(&mut self, dur: Duration) -> std::io::Result<Option<std::process::ExitStatus>> {
        wait_timeout::ChildExt::wait_timeout(self, dur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_capture_returns_stdout() {
        let spec = RunSpec {
            argv: &["echo", "hello"],
            cwd: None,
            env: &[],
            timeout: None,
            on_failure: OnFailure::Raise,
            stdin: None,
        };
        let out = run_capture("test", spec).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, Some(0));
    }

    #[test]
    fn run_capture_return_policy_does_not_raise() {
        let spec = RunSpec {
            argv: &["false"],
            cwd: None,
            env: &[],
            timeout: None,
            on_failure: OnFailure::Return,
            stdin: None,
        };
        let out = run_capture("test", spec).unwrap();
        assert_ne!(out.exit_code, Some(0));
    }

    #[test]
    fn run_capture_raise_policy_errors_on_nonzero() {
        let spec = RunSpec {
            argv: &["false"],
            cwd: None,
            env: &[],
            timeout: None,
            on_failure: OnFailure::Raise,
            stdin: None,
        };
        assert!(run_capture("test", spec).is_err());
    }

    #[test]
    fn run_stream_to_log_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("out.log");
        let spec = RunSpec {
            argv: &["echo", "streamed"],
            cwd: None,
            env: &[],
            timeout: None,
            on_failure: OnFailure::Raise,
            stdin: None,
        };
        let out = run_stream_to_log("test", spec, &log_path).unwrap();
        assert_eq!(out.stdout.trim(), "streamed");
        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert!(logged.contains("streamed"));
    }
}
