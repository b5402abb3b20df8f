//! Helpers for running child processes with timeouts and bounded output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Stdout followed by stderr, lossily decoded, with truncation notices.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            text.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        if self.stderr_truncated > 0 {
            text.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        text
    }
}

/// True if `err` (or anything it wraps) is an I/O "not found" error, e.g. a
/// missing executable at spawn time.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            debug!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        debug!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// A running child whose stdout is delivered line by line over a channel.
pub struct LineStream {
    pub child: Child,
    /// Lines of stdout (without trailing newline). Disconnects at EOF.
    pub lines: Receiver<String>,
    stdout_handle: Option<thread::JoinHandle<Result<()>>>,
    stderr_handle: Option<thread::JoinHandle<Result<(Vec<u8>, usize)>>>,
}

impl LineStream {
    /// Collect reader threads after the child exited on its own.
    ///
    /// Returns captured (bounded) stderr.
    pub fn finish(mut self) -> Result<String> {
        if let Some(handle) = self.stdout_handle.take() {
            match handle.join() {
                Ok(result) => result.context("read stdout")?,
                Err(_) => return Err(anyhow!("stdout reader thread panicked")),
            }
        }
        let stderr = match self.stderr_handle.take() {
            Some(handle) => join_output(handle).context("join stderr")?.0,
            None => Vec::new(),
        };
        Ok(String::from_utf8_lossy(&stderr).into_owned())
    }
}

/// Spawn `cmd` and stream its stdout line by line, tee-ing raw lines to `tee_path`.
///
/// Stdout lines are forwarded as they arrive; stderr is drained concurrently
/// into a buffer bounded by `stderr_limit`.
#[instrument(skip_all, fields(tee = %tee_path.display()))]
pub fn spawn_line_stream(mut cmd: Command, tee_path: &Path, stderr_limit: usize) -> Result<LineStream> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    if let Some(parent) = tee_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let tee = File::create(tee_path)
        .with_context(|| format!("create log file {}", tee_path.display()))?;

    debug!("spawning streaming child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stdout_handle = thread::spawn(move || -> Result<()> {
        let mut reader = BufReader::new(stdout);
        let mut writer = BufWriter::new(tee);
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).context("read line")?;
            if n == 0 {
                break;
            }
            if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
                warn!(err = %e, "failed to write session log");
            }
            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            // Receiver may be gone; keep draining so the child never blocks on a full pipe.
            let _ = tx.send(text);
        }
        Ok(())
    });
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, stderr_limit));

    Ok(LineStream {
        child,
        lines: rx,
        stdout_handle: Some(stdout_handle),
        stderr_handle: Some(stderr_handle),
    })
}

/// Ask `child` to exit (SIGTERM), wait up to `grace`, then kill it.
#[instrument(skip_all, fields(pid = child.id(), grace_secs = grace.as_secs()))]
pub fn terminate_gracefully(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if let Some(status) = child.try_wait().context("poll child")? {
        return Ok(status);
    }
    send_terminate(child);
    if let Some(status) = child.wait_timeout(grace).context("wait for child")? {
        debug!(exit_code = ?status.code(), "child exited after terminate");
        return Ok(status);
    }
    warn!("child ignored terminate, killing");
    child.kill().context("kill child")?;
    child.wait().context("wait child after kill")
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(err = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(err = %e, "failed to kill child");
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_truncates() {
        let out = run_command_with_timeout(sh("printf 'abcdef'; printf 'err' >&2"), Duration::from_secs(5), 3)
            .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout, b"abc");
        assert_eq!(out.stdout_truncated, 3);
        assert!(out.combined().contains("[stdout truncated 3 bytes]"));
        assert!(out.combined().contains("err"));
    }

    #[test]
    fn timeout_kills_child() {
        let out = run_command_with_timeout(sh("sleep 5"), Duration::from_millis(200), 100).expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[test]
    fn missing_binary_is_not_found() {
        let err = run_command_with_timeout(
            Command::new("definitely-not-a-real-binary-a1"),
            Duration::from_secs(1),
            100,
        )
        .unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn line_stream_forwards_and_tees() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("logs").join("session_001.log");
        let mut stream = spawn_line_stream(sh("echo one; echo two"), &log, 1000).expect("spawn");

        let lines: Vec<String> = stream.lines.iter().collect();
        assert_eq!(lines, ["one", "two"]);
        stream.child.wait().expect("wait");
        stream.finish().expect("finish");
        assert_eq!(std::fs::read_to_string(&log).expect("read"), "one\ntwo\n");
    }

    #[test]
    fn terminate_stops_long_running_child() {
        let mut child = sh("sleep 30").spawn().expect("spawn");
        let started = Instant::now();
        let status = terminate_gracefully(&mut child, Duration::from_secs(5)).expect("terminate");
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
