use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{CommandFailure, FailureKind};

/// Number of trailing output lines kept for failure reports.
pub const OUTPUT_TAIL_LINES: usize = 32;

/// Lines of the tail quoted in a failure's detail message.
const DETAIL_LINES: usize = 5;

/// How long output readers may keep draining after the child exited.
///
/// A grandchild that inherited the pipes keeps them open past the child's
/// exit; its readers are detached once this runs out.
pub const READER_GRACE: Duration = Duration::from_secs(1);

/// Result of a child process that ran to completion.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    /// Last [`OUTPUT_TAIL_LINES`] lines of combined stdout/stderr, oldest first.
    pub tail: Vec<String>,
}

type Tail = Arc<Mutex<VecDeque<String>>>;

/// Spawn `command`, forward its output to the log and wait for it to exit.
///
/// Each line is logged as `[label:stdout] ...` or `[label:stderr] ...`. The
/// reader threads are joined before returning unless a process that
/// outlives the child still holds the pipes after [`READER_GRACE`]; the
/// tail then holds whatever was read so far.
pub fn run_logged(command: &mut Command, label: &str) -> std::io::Result<ProcessOutput> {
    log::debug!("Running {label}: {command:?}");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let tail: Tail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES)));
    let mut readers = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, format!("{label}:stdout"), Arc::clone(&tail)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, format!("{label}:stderr"), Arc::clone(&tail)));
    }

    let status = child.wait()?;
    join_readers(readers, label);

    let tail = tail
        .lock()
        .map(|lines| lines.iter().cloned().collect())
        .unwrap_or_default();

    log::debug!("{label} exited with {status}");
    Ok(ProcessOutput { status, tail })
}

/// Run `command` and turn anything but a clean exit into a [`CommandFailure`].
pub fn run_checked(command: &mut Command, label: &str) -> Result<ProcessOutput, CommandFailure> {
    let output = run_logged(command, label).map_err(|e| CommandFailure::spawn(label, &e))?;
    if output.status.success() {
        Ok(output)
    } else if terminating_signal(&output.status).is_some() {
        Err(failure_from(label, &output, FailureKind::Terminated))
    } else {
        Err(failure_from(label, &output, FailureKind::Exited))
    }
}

/// Signal that killed the process, if it did not exit on its own.
#[cfg(unix)]
pub fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
pub fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Build a failure report quoting the end of the process output.
pub fn failure_from(label: &str, output: &ProcessOutput, kind: FailureKind) -> CommandFailure {
    let quoted = &output.tail[output.tail.len().saturating_sub(DETAIL_LINES)..];
    let headline = match terminating_signal(&output.status) {
        Some(signal) => format!("{label} killed by signal {signal}"),
        None => format!("{label} failed"),
    };
    let detail = if quoted.is_empty() {
        headline
    } else {
        format!("{headline}:\n  {}", quoted.join("\n  "))
    };
    CommandFailure::new(kind, output.status.code(), detail)
}

fn join_readers(readers: Vec<JoinHandle<()>>, label: &str) {
    let deadline = Instant::now() + READER_GRACE;
    while readers.iter().any(|r| !r.is_finished()) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    for reader in readers {
        if !reader.is_finished() {
            log::debug!("Output of {label} is still open after exit, no longer waiting for it");
            continue;
        }
        if reader.join().is_err() {
            log::error!("Output reader for {label} panicked");
        }
    }
}

fn forward_lines<R>(reader: R, tag: String, tail: Tail) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => {
                    log::info!("[{tag}] {line}");
                    if let Ok(mut lines) = tail.lock() {
                        if lines.len() == OUTPUT_TAIL_LINES {
                            lines.pop_front();
                        }
                        lines.push_back(line);
                    }
                }
                Err(err) => {
                    log::error!("Error reading {tag}: {err}");
                    break;
                }
            }
        }
    })
}
