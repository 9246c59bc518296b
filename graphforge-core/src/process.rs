//! Blocking external process execution with an optional time budget.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ProcessReport, ToolError};

/// How often a timed child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long a killed child's pipes get to drain before its output is snapshotted.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Runs external commands to completion and captures their output.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `cmd` and wait for it. A non-zero exit is not an error here;
    /// callers inspect [`ProcessReport::exit_code`].
    pub fn run(&self, mut cmd: Command) -> Result<ProcessReport, ToolError> {
        let command = describe_command(&cmd);
        debug!("Running {}", command);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.timeout {
            None => child.wait(),
            Some(timeout) => match wait_with_deadline(&mut child, timeout) {
                Some(status) => status,
                None => {
                    warn!("Killing `{}` after {:?}", command, timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    // Grandchildren may still hold the pipes open, so never join here.
                    let deadline = Instant::now() + DRAIN_GRACE;
                    while !(stdout.is_finished() && stderr.is_finished())
                        && Instant::now() < deadline
                    {
                        thread::sleep(POLL_INTERVAL);
                    }
                    return Err(ToolError::TimedOut {
                        timeout,
                        report: ProcessReport {
                            command,
                            exit_code: None,
                            stdout: stdout.snapshot(),
                            stderr: stderr.snapshot(),
                        },
                    });
                }
            },
        }
        .map_err(|source| ToolError::Spawn {
            command: command.clone(),
            source,
        })?;

        Ok(ProcessReport {
            command,
            exit_code: status.code(),
            stdout: stdout.finish(),
            stderr: stderr.finish(),
        })
    }
}

/// Poll `child` until it exits or `timeout` elapses. `None` means the deadline passed.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Option<std::io::Result<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(Ok(status)),
            Ok(None) if Instant::now() >= deadline => return None,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Some(Err(e)),
        }
    }
}

/// Output of one pipe, collected on a background thread.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl Capture {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Whatever was read so far. The reader thread keeps running.
    fn snapshot(&self) -> String {
        match self.buf.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }

    /// Wait for end of stream and return everything read.
    fn finish(self) -> String {
        let Capture { buf, handle } = self;
        let _ = handle.join();
        let out = match buf.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        };
        out
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Capture {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buf);
    let handle = thread::spawn(move || {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(_) => break,
                },
            }
        }
    });
    Capture { buf, handle }
}

/// Program and arguments joined by spaces, for logs and reproduction.
pub fn describe_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
