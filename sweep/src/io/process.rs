//! Child process execution with an optional deadline and bounded output capture.

use std::io::{ErrorKind, Read, Write};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Output of a finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the capture limit.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Captured stdout followed by a truncation note, if any bytes were dropped.
    pub fn stdout_log(&self) -> Vec<u8> {
        with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_log(&self) -> Vec<u8> {
        with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }

    /// Last line of stderr, for short error messages.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

fn with_notice(buf: &[u8], truncated: usize, label: &str) -> Vec<u8> {
    let mut out = buf.to_vec();
    if truncated > 0 {
        out.extend_from_slice(format!("\n[{label} truncated {truncated} bytes]\n").as_bytes());
    }
    out
}

/// How long reader threads may keep draining after a timed-out child is
/// killed. Pipes inherited by processes outside the child's group can stay
/// open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Bytes kept from one stream plus the count of bytes dropped past the limit.
#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

/// A stream being drained on its own thread. The buffer is shared so output
/// read so far survives a reader that never reaches EOF.
struct CaptureHandle {
    label: &'static str,
    buffer: Arc<Mutex<Capture>>,
    done: mpsc::Receiver<Result<()>>,
}

/// Run `cmd`, feeding `stdin` and draining stdout/stderr on helper threads so
/// the child never blocks on a full pipe.
///
/// With a `timeout`, the child is killed once it elapses and `timed_out` is
/// set. On unix the child then leads its own process group and the whole
/// group is killed, so subprocesses started by a shell wrapper die with it.
/// Without a timeout, the call waits for the child indefinitely.
#[instrument(skip_all, fields(timeout = ?timeout, output_limit_bytes))]
pub fn run_process(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    let stdin_mode = if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    cmd.stdin(stdin_mode)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        if timeout.is_some() {
            cmd.process_group(0);
        }
    }

    debug!("spawning child process");
    let mut child = cmd
        .spawn()
        .inspect_err(|err| error!(err = %err, "failed to spawn command"))
        .context("spawn command")?;

    let stdout = spawn_capture(child.stdout.take(), "stdout", output_limit_bytes)?;
    let stderr = spawn_capture(child.stderr.take(), "stderr", output_limit_bytes)?;

    if let Some(input) = stdin {
        let mut pipe = child.stdin.take().context("stdin was not piped")?;
        // A child that exits without reading stdin is not an error.
        if let Err(err) = pipe.write_all(input) {
            if err.kind() != ErrorKind::BrokenPipe {
                return Err(err).context("write stdin");
            }
            debug!("child closed stdin early");
        }
    }

    let (status, timed_out) = match timeout {
        None => (child.wait().context("wait for command")?, false),
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => (status, false),
            None => {
                warn!(timeout_secs = limit.as_secs_f64(), "command timed out, killing");
                kill_process_group(child.id());
                child.kill().context("kill command")?;
                (child.wait().context("wait command after kill")?, true)
            }
        },
    };

    let grace = timed_out.then_some(DRAIN_GRACE);
    let stdout = finish_capture(stdout, grace)?;
    let stderr = finish_capture(stderr, grace)?;
    if stdout.dropped + stderr.dropped > 0 {
        warn!(
            stdout_truncated = stdout.dropped,
            stderr_truncated = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout: stdout.kept,
        stderr: stderr.kept,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

/// SIGKILL every process in the group led by `pid`. Best effort: the direct
/// child is killed separately either way.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let result = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(status) if status.success() => debug!(pgid = pid, "process group killed"),
        Ok(status) => debug!(pgid = pid, code = ?status.code(), "kill reported failure"),
        Err(err) => warn!(pgid = pid, err = %err, "could not run kill for process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

fn spawn_capture<R>(stream: Option<R>, label: &'static str, limit: usize) -> Result<CaptureHandle>
where
    R: Read + Send + 'static,
{
    let stream = stream.with_context(|| format!("{label} was not piped"))?;
    let buffer = Arc::new(Mutex::new(Capture::default()));
    let (tx, done) = mpsc::channel();
    let shared = Arc::clone(&buffer);
    thread::spawn(move || {
        // The receiver is gone once the caller stopped waiting.
        let _ = tx.send(capture(stream, limit, &shared));
    });
    Ok(CaptureHandle {
        label,
        buffer,
        done,
    })
}

/// Wait for a reader to hit EOF, or at most `grace` when one is given, then
/// take what it captured.
fn finish_capture(handle: CaptureHandle, grace: Option<Duration>) -> Result<Capture> {
    let label = handle.label;
    let finished = match grace {
        None => handle
            .done
            .recv()
            .map_err(|_| anyhow!("{label} reader thread panicked"))?,
        Some(grace) => match handle.done.recv_timeout(grace) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(stream = label, "output still open after kill, detaching reader");
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                bail!("{label} reader thread panicked")
            }
        },
    };
    finished.with_context(|| format!("collect {label}"))?;
    let mut buffer = handle
        .buffer
        .lock()
        .map_err(|_| anyhow!("{label} buffer poisoned"))?;
    Ok(std::mem::take(&mut *buffer))
}

/// Read `reader` to EOF, keeping at most `limit` bytes in `buffer`.
fn capture<R: Read>(mut reader: R, limit: usize, buffer: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk).context("read output")?;
        if read == 0 {
            return Ok(());
        }
        let mut out = buffer
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        let room = limit.saturating_sub(out.kept.len()).min(read);
        out.kept.extend_from_slice(&chunk[..room]);
        out.dropped += read - room;
    }
}
