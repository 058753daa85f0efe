//! Helpers for running child processes with a hard timeout.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::Termination;

/// How long output readers may keep draining after the child is gone.
///
/// A grandchild that inherited the pipes can keep them open indefinitely; past
/// this point whatever was read so far is returned.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn termination(&self) -> Termination {
        if self.timed_out {
            return Termination::TimedOut;
        }
        match self.status.code() {
            Some(code) => Termination::Exited { code },
            None => Termination::Signaled {
                signal: exit_signal(&self.status),
            },
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Run a command with stdin closed, capturing both output streams in full.
///
/// Both pipes are drained concurrently while the child runs, so a chatty child
/// cannot deadlock on a full pipe. If the child outlives `timeout` it is killed
/// and reaped, and `timed_out` is set.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
pub fn run_command_with_timeout(mut cmd: Command, timeout: Duration) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let started = Instant::now();
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

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    spawn_reader(stdout, Arc::clone(&stdout_buf), done_tx.clone());
    spawn_reader(stderr, Arc::clone(&stderr_buf), done_tx);

    let waited = match child.wait_timeout(timeout) {
        Ok(waited) => waited,
        Err(e) => {
            error!(err = %e, "waiting on child failed, killing it");
            let _ = kill_and_reap(&mut child);
            return Err(e).context("wait for command");
        }
    };
    let mut timed_out = false;
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            kill_and_reap(&mut child)?
        }
    };
    let duration = started.elapsed();

    let grace_end = Instant::now() + READER_GRACE;
    for _ in 0..2 {
        let left = grace_end.saturating_duration_since(Instant::now());
        if done_rx.recv_timeout(left).is_err() {
            warn!("output pipes still open after exit, keeping partial output");
            break;
        }
    }

    let stdout = take_buffer(&stdout_buf);
    let stderr = take_buffer(&stderr_buf);
    debug!(
        exit_code = ?status.code(),
        timed_out,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "command finished"
    );
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
        duration,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Sender<()>,
) {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => lock(&buf).extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(err = %e, "read output failed");
                    break;
                }
            }
        }
        let _ = done.send(());
    });
}

/// Kill `child` and wait for it so no process outlives its invocation.
fn kill_and_reap(child: &mut Child) -> Result<ExitStatus> {
    if let Err(e) = child.kill() {
        warn!(err = %e, "kill failed, child may have exited");
    }
    child.wait().context("wait command after kill")
}

fn take_buffer(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    std::mem::take(&mut *lock(buf))
}

fn lock(buf: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let output = run_command_with_timeout(
            sh("printf out; printf err >&2; exit 3"),
            Duration::from_secs(10),
        )
        .expect("run");
        assert_eq!(output.stdout, b"out");
        assert_eq!(output.stderr, b"err");
        assert!(!output.timed_out);
        assert_eq!(output.termination(), Termination::Exited { code: 3 });
    }

    #[test]
    fn captures_large_output_without_truncation() {
        let output = run_command_with_timeout(
            sh("head -c 300000 /dev/zero"),
            Duration::from_secs(10),
        )
        .expect("run");
        assert_eq!(output.stdout.len(), 300_000);
    }

    #[test]
    fn kills_child_that_outlives_timeout() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("printf partial; exec sleep 5"),
            Duration::from_millis(200),
        )
        .expect("run");
        assert!(output.timed_out);
        assert_eq!(output.termination(), Termination::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(output.stdout, b"partial");
    }

    #[test]
    fn reports_signal_termination() {
        let output =
            run_command_with_timeout(sh("kill -9 $$"), Duration::from_secs(10)).expect("run");
        assert_eq!(output.termination(), Termination::Signaled { signal: Some(9) });
    }

    #[test]
    fn kill_and_reap_stops_a_running_child() {
        let started = Instant::now();
        let mut child = sh("exec sleep 30").spawn().expect("spawn");
        let status = kill_and_reap(&mut child).expect("reap");
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().expect("try_wait").is_some());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run_command_with_timeout(
            Command::new("definitely-not-a-real-program-xyz"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn command"));
    }
}
