//! Child-process execution of the backend.
//!
//! [`ProcessExecutor`] implements [`BackendExecutor`] by running
//! `<node_bin> <entrypoint> <args...>` from the repository root with both
//! output streams captured. Without a deadline it simply waits for exit.
//! With one, the child leads its own process group, the streams are drained
//! on helper threads while the child is polled, and an overdue child is
//! killed together with everything it started.

use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::invoker::{BackendExecutor, BackendProgram, ExecutionError, Invocation, ProcessOutput};

/// Tracing target for backend process operations.
const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Interval between exit checks while a deadline is active.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time allowed for the pipe readers to finish once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Executes the backend as a local child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl BackendExecutor for ProcessExecutor {
    fn execute(
        &self,
        program: &BackendProgram,
        invocation: &Invocation,
    ) -> Result<ProcessOutput, ExecutionError> {
        let mut command = Command::new(program.node_bin());
        command
            .arg(program.entrypoint().as_std_path())
            .args(invocation.to_args())
            .current_dir(program.repo_root().as_std_path())
            .stdin(Stdio::null());

        match program.timeout() {
            None => run_to_completion(program, command),
            Some(timeout) => run_with_deadline(program, command, timeout),
        }
    }
}

fn run_to_completion(
    program: &BackendProgram,
    mut command: Command,
) -> Result<ProcessOutput, ExecutionError> {
    let output = command.output().map_err(|error| ExecutionError::Spawn {
        program: program.node_bin().to_owned(),
        source: Arc::new(error),
    })?;
    Ok(decode(&output))
}

fn run_with_deadline(
    program: &BackendProgram,
    mut command: Command,
    timeout: Duration,
) -> Result<ProcessOutput, ExecutionError> {
    let name = program.node_bin();
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| ExecutionError::Spawn {
            program: name.to_owned(),
            source: Arc::new(error),
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(
                    target: PROCESS_TARGET,
                    program = name,
                    ?status,
                    "backend process exited"
                );
                let wait = timeout
                    .saturating_sub(start.elapsed())
                    .saturating_add(DRAIN_GRACE);
                return Ok(ProcessOutput {
                    status: status.code(),
                    stdout: collect(stdout, wait),
                    stderr: collect(stderr, wait),
                });
            }
            Ok(None) if start.elapsed() > timeout => {
                warn!(
                    target: PROCESS_TARGET,
                    program = name,
                    timeout_secs = timeout.as_secs(),
                    "backend timed out, killing process"
                );
                reap(&mut child);
                return Err(ExecutionError::Timeout {
                    program: name.to_owned(),
                    timeout_secs: timeout.as_secs(),
                    partial: ProcessOutput {
                        status: None,
                        stdout: collect(stdout, DRAIN_GRACE),
                        stderr: collect(stderr, DRAIN_GRACE),
                    },
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(error) => {
                reap(&mut child);
                return Err(ExecutionError::Wait {
                    program: name.to_owned(),
                    source: Arc::new(error),
                });
            }
        }
    }
}

fn reap(child: &mut Child) {
    #[cfg(unix)]
    kill_group(child.id());
    if let Err(error) = child.kill() {
        debug!(target: PROCESS_TARGET, error = %error, "kill failed");
    }
    if let Err(error) = child.wait() {
        debug!(target: PROCESS_TARGET, error = %error, "reap failed");
    }
}

/// Signals the child's whole process group so grandchildren holding the
/// output pipes die with it.
#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(group) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: `kill(2)` touches no memory; an exited group just yields ESRCH.
    let result = unsafe { libc::kill(-group, libc::SIGKILL) };
    if result != 0 {
        debug!(
            target: PROCESS_TARGET,
            error = %std::io::Error::last_os_error(),
            "process group kill failed"
        );
    }
}

/// Reads a pipe to completion on a helper thread so the child never blocks
/// on a full pipe buffer.
fn drain(mut pipe: impl Read + Send + 'static) -> Receiver<Vec<u8>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(error) = pipe.read_to_end(&mut buffer) {
            debug!(target: PROCESS_TARGET, error = %error, "pipe read failed");
        }
        if sender.send(buffer).is_err() {
            debug!(target: PROCESS_TARGET, "pipe output abandoned");
        }
    });
    receiver
}

/// Waits at most `wait` for a pipe reader. A pipe still held open by an
/// escaped descendant yields empty output rather than blocking the call.
fn collect(reader: Option<Receiver<Vec<u8>>>, wait: Duration) -> String {
    reader
        .and_then(|pending| pending.recv_timeout(wait).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn decode(output: &Output) -> ProcessOutput {
    ProcessOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}
