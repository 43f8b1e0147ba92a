//! Run a child process in its own process group with a timeout, bounded output
//! capture, and graceful-then-forced termination of the whole group.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How often the wait loop checks for an interrupt.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace between SIGTERM and SIGKILL when the timeout expires.
pub const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Grace between SIGTERM and SIGKILL when the caller is interrupted.
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// How the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
}

/// Captured output of a process-group run.
#[derive(Debug)]
pub struct GroupOutput {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl GroupOutput {
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(status) => status.code(),
            Termination::TimedOut | Termination::Interrupted => None,
        }
    }

    pub fn stdout_text(&self) -> String {
        with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_text(&self) -> String {
        with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn with_notice(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

/// Spawn failure, kept apart from wait/collect failures so callers can report
/// "failed to start" distinctly.
#[derive(Debug, thiserror::Error)]
#[error("spawn {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Run `cmd` in a fresh process group.
///
/// Output is drained concurrently so the child never blocks on a full pipe;
/// at most `output_limit_bytes` per stream are kept. On timeout or when
/// `interrupt` is cancelled, the group receives SIGTERM, then SIGKILL after the
/// matching grace period.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_in_process_group(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    interrupt: &CancellationToken,
) -> Result<std::result::Result<GroupOutput, SpawnError>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    debug!("spawning child process group");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Ok(Err(SpawnError {
                program: cmd.get_program().to_string_lossy().into_owned(),
                source: e,
            }));
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        abandon_group(&mut child);
        return Err(anyhow!("child output was not piped"));
    };

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let termination = match wait_for_group(&mut child, timeout, interrupt) {
        Ok(termination) => termination,
        Err(err) => {
            error!(err = %format!("{err:#}"), "lost track of command, killing process group");
            abandon_group(&mut child);
            return Err(err);
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(termination = ?termination, "command finished");
    Ok(Ok(GroupOutput {
        termination,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    }))
}

fn wait_for_group(
    child: &mut Child,
    timeout: Duration,
    interrupt: &CancellationToken,
) -> Result<Termination> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(status) = child
            .wait_timeout(remaining.min(POLL_INTERVAL))
            .context("wait for command")?
        {
            return Ok(Termination::Exited(status));
        }
        if interrupt.is_cancelled() {
            warn!("interrupt received, terminating process group");
            terminate_group(child, INTERRUPT_GRACE)?;
            return Ok(Termination::Interrupted);
        }
        if Instant::now() >= deadline {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, terminating process group"
            );
            terminate_group(child, TIMEOUT_GRACE)?;
            return Ok(Termination::TimedOut);
        }
    }
}

fn group_of(child: &Child) -> Pid {
    Pid::from_raw(child.id() as i32)
}

/// SIGTERM the child's group, wait up to `grace` for the leader, then SIGKILL
/// whatever is left of the group.
fn terminate_group(child: &mut Child, grace: Duration) -> Result<()> {
    let pgid = group_of(child);
    signal_group(pgid, Signal::SIGTERM);
    let leader_exited = child
        .wait_timeout(grace)
        .context("wait for command after SIGTERM")?
        .is_some();
    if !leader_exited {
        warn!(grace_secs = grace.as_secs(), "process group ignored SIGTERM, killing");
    }
    // Descendants outlive a reaped leader and keep the output pipes open.
    signal_group(pgid, Signal::SIGKILL);
    if !leader_exited {
        child.wait().context("wait command after kill")?;
    }
    Ok(())
}

/// SIGKILL the group and reap the leader after supervision itself failed.
fn abandon_group(child: &mut Child) {
    signal_group(group_of(child), Signal::SIGKILL);
    if let Err(err) = child.wait() {
        warn!(err = %err, "failed to reap abandoned command");
    }
}

fn signal_group(pgid: Pid, signal: Signal) {
    if let Err(err) = killpg(pgid, signal) {
        // ESRCH: the group already exited between the wait and the signal.
        if err != nix::errno::Errno::ESRCH {
            warn!(err = %err, signal = ?signal, "failed to signal process group");
        }
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
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
