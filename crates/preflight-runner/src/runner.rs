//! Process launch, stream draining and termination.

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{CancelToken, ExecutionResult, LineConsumer, OutputLine, Stream};

/// Which time limit ended a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutKind {
    /// Total run time exceeded
    Overall,
    /// No output for too long
    Idle,
}

impl TimeoutKind {
    pub fn failure_subkind(&self) -> &'static str {
        match self {
            TimeoutKind::Overall => "TIMEOUT_OVERALL",
            TimeoutKind::Idle => "TIMEOUT_IDLE",
        }
    }
}

/// Errors from running a process
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("process exited with status {code}")]
    ExitedNonZero { code: i32, result: ExecutionResult },

    #[error("process was terminated by {signal}")]
    Terminated {
        signal: String,
        result: ExecutionResult,
    },

    #[error("process cancelled")]
    Cancelled { result: ExecutionResult },

    #[error("process timed out ({})", .kind.failure_subkind())]
    TimedOut {
        kind: TimeoutKind,
        result: ExecutionResult,
    },

    #[error("I/O error while waiting for process: {0}")]
    Io(#[from] io::Error),
}

impl RunError {
    /// Output captured before the failure, when the process got that far
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            RunError::ExitedNonZero { result, .. }
            | RunError::Terminated { result, .. }
            | RunError::Cancelled { result }
            | RunError::TimedOut { result, .. } => Some(result),
            RunError::EmptyCommand | RunError::Launch { .. } | RunError::Io(_) => None,
        }
    }

    /// True when the process never started
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, RunError::EmptyCommand | RunError::Launch { .. })
    }
}

/// Limits and controls for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum wall-clock time (None = unlimited)
    pub overall_timeout: Option<Duration>,

    /// Maximum time without a new output line (None = unlimited)
    pub idle_timeout: Option<Duration>,

    /// Time between SIGTERM and SIGKILL, and the longest wait for the
    /// output pipes to close after the process has exited
    pub grace_period: Duration,

    /// How often the wait loop checks exit status, cancellation and limits
    pub poll_interval: Duration,

    /// Working directory for the child (None = inherit)
    pub working_dir: Option<PathBuf>,

    /// Cancellation flag checked while the process runs
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            overall_timeout: None,
            idle_timeout: None,
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            working_dir: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Why the runner stopped the child itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    TimedOut(TimeoutKind),
}

/// Tracks wall-clock and idle limits for one run.
#[derive(Debug)]
struct Watchdog {
    overall: Option<Duration>,
    idle: Option<Duration>,
    start: Instant,
    last_activity: Instant,
}

impl Watchdog {
    fn new(overall: Option<Duration>, idle: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            overall,
            idle,
            start: now,
            last_activity: now,
        }
    }

    fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    fn check(&self) -> Option<TimeoutKind> {
        if self.overall.is_some_and(|limit| self.start.elapsed() > limit) {
            return Some(TimeoutKind::Overall);
        }
        if self.idle.is_some_and(|limit| self.last_activity.elapsed() > limit) {
            return Some(TimeoutKind::Idle);
        }
        None
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Runs external commands with streamed output.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    options: RunOptions,
}

impl Runner {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Run `cmd` (program followed by its arguments) to completion.
    ///
    /// Every output line is passed to `consumer` as it arrives. A zero exit
    /// status returns `Ok`; everything else, including a nonzero exit, is
    /// an error carrying the output captured so far.
    pub fn run<C>(&self, cmd: &[String], consumer: &mut C) -> Result<ExecutionResult, RunError>
    where
        C: LineConsumer + ?Sized,
    {
        let (program, args) = cmd.split_first().ok_or(RunError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.options.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| RunError::Launch {
            program: program.clone(),
            source,
        })?;
        info!(pid = child.id(), program = %program, args = args.len(), "process started");

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut watchdog = Watchdog::new(self.options.overall_timeout, self.options.idle_timeout);
        let mut output = Vec::new();
        let mut status: Option<ExitStatus> = None;
        let mut stop: Option<StopReason> = None;
        let mut streams_open = true;
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if streams_open {
                match rx.recv_timeout(self.options.poll_interval) {
                    Ok(line) => {
                        watchdog.record_activity();
                        consumer.line(line.stream, &line.text);
                        output.push(line);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            } else if status.is_none() {
                thread::sleep(self.options.poll_interval);
            }

            if status.is_none() {
                status = child.try_wait()?;
            }

            if let Some(exit) = status {
                if !streams_open {
                    break;
                }
                // A grandchild may still hold the pipes open.
                let deadline =
                    *drain_deadline.get_or_insert_with(|| Instant::now() + self.options.grace_period);
                if Instant::now() >= deadline {
                    debug!(?exit, "output pipes still open after exit; detaching readers");
                    break;
                }
                continue;
            }

            if stop.is_none() {
                stop = if self.options.cancel.is_cancelled() {
                    Some(StopReason::Cancelled)
                } else {
                    watchdog.check().map(StopReason::TimedOut)
                };
                if let Some(reason) = stop {
                    warn!(?reason, pid = child.id(), "stopping process");
                    status = Some(terminate(&mut child, self.options.grace_period)?);
                }
            }
        }

        if !streams_open {
            for reader in readers {
                let _ = reader.join();
            }
        }

        // The loop only exits once an exit status has been collected.
        let status = match status {
            Some(status) => status,
            None => child.wait()?,
        };

        let result = ExecutionResult {
            exit_code: status.code(),
            output,
            duration: watchdog.elapsed(),
        };
        debug!(
            exit_code = ?result.exit_code,
            lines = result.output.len(),
            duration_ms = result.duration.as_millis() as u64,
            "process finished"
        );

        match stop {
            Some(StopReason::Cancelled) => Err(RunError::Cancelled { result }),
            Some(StopReason::TimedOut(kind)) => Err(RunError::TimedOut { kind, result }),
            None => match result.exit_code {
                Some(0) => Ok(result),
                Some(code) => Err(RunError::ExitedNonZero { code, result }),
                None => Err(RunError::Terminated {
                    signal: signal_name(&status),
                    result,
                }),
            },
        }
    }
}

fn spawn_reader<R>(pipe: R, stream: Stream, tx: Sender<OutputLine>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    let line = OutputLine {
                        stream,
                        text: String::from_utf8_lossy(&buf).into_owned(),
                    };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Stop the child's process group: SIGTERM, then SIGKILL after `grace`.
fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(child.id() as i32);
        let _ = killpg(pgid, Signal::SIGTERM);

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                let _ = killpg(pgid, Signal::SIGKILL);
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(20));
        }
        let _ = killpg(pgid, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
    }

    let _ = child.kill();
    child.wait()
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(raw) => nix::sys::signal::Signal::try_from(raw)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("signal {}", raw)),
        None => "unknown signal".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> String {
    "unknown signal".to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn discard() -> impl FnMut(Stream, &str) {
        |_: Stream, _: &str| {}
    }

    #[test]
    fn test_success_captures_both_streams() {
        let runner = Runner::default();
        let mut seen = Vec::new();
        let result = runner
            .run(
                &sh("echo 'Device signature = 0x1e9705'; echo 'reading fuses' >&2"),
                &mut |stream: Stream, text: &str| seen.push((stream, text.to_string())),
            )
            .unwrap();

        assert!(result.success());
        assert_eq!(
            result.lines(Stream::Stdout).collect::<Vec<_>>(),
            vec!["Device signature = 0x1e9705"]
        );
        assert_eq!(result.text(Stream::Stderr), "reading fuses");
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(Stream::Stderr, "reading fuses".to_string())));
    }

    #[test]
    fn test_nonzero_exit_delivers_stderr_first() {
        let runner = Runner::default();
        let mut seen = Vec::new();
        let err = runner
            .run(
                &sh("echo 'fuse mismatch' >&2; exit 2"),
                &mut |stream: Stream, text: &str| seen.push((stream, text.to_string())),
            )
            .unwrap_err();

        match &err {
            RunError::ExitedNonZero { code, result } => {
                assert_eq!(*code, 2);
                assert_eq!(result.text(Stream::Stderr), "fuse mismatch");
            }
            other => panic!("expected ExitedNonZero, got {other:?}"),
        }
        assert_eq!(seen, vec![(Stream::Stderr, "fuse mismatch".to_string())]);
        assert!(!err.is_launch_failure());
    }

    #[test]
    fn test_missing_binary_is_launch_error() {
        let runner = Runner::default();
        let mut consumer = discard();
        let err = runner
            .run(
                &["/nonexistent/bin/avrdude".to_string(), "-v".to_string()],
                &mut consumer,
            )
            .unwrap_err();
        assert!(matches!(err, RunError::Launch { ref program, .. } if program == "/nonexistent/bin/avrdude"));
        assert!(err.is_launch_failure());
        assert!(err.result().is_none());
    }

    #[test]
    fn test_empty_command() {
        let mut consumer = discard();
        let err = Runner::default().run(&[], &mut consumer).unwrap_err();
        assert!(matches!(err, RunError::EmptyCommand));
    }

    #[test]
    fn test_large_output_on_both_pipes_does_not_block() {
        let runner = Runner::default();
        let mut count = 0usize;
        let result = runner
            .run(
                &sh("i=0; while [ $i -lt 20000 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done"),
                &mut |_: Stream, _: &str| count += 1,
            )
            .unwrap();
        assert_eq!(count, 40000);
        assert_eq!(result.lines(Stream::Stdout).count(), 20000);
        assert_eq!(result.lines(Stream::Stderr).last(), Some("err19999"));
    }

    #[test]
    fn test_lines_keep_per_stream_order() {
        let runner = Runner::default();
        let mut consumer = discard();
        let result = runner
            .run(&sh("for n in 1 2 3 4 5; do echo $n; done"), &mut consumer)
            .unwrap();
        assert_eq!(
            result.lines(Stream::Stdout).collect::<Vec<_>>(),
            vec!["1", "2", "3", "4", "5"]
        );
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let runner = Runner::default();
        let mut consumer = discard();
        let result = runner
            .run(&sh("printf 'fuse \\377 ok\\n'"), &mut consumer)
            .unwrap();
        assert_eq!(result.text(Stream::Stdout), "fuse \u{FFFD} ok");
    }

    #[test]
    fn test_cancel_stops_process() {
        let options = RunOptions {
            grace_period: Duration::from_millis(500),
            ..RunOptions::default()
        };
        let token = options.cancel.clone();
        let runner = Runner::new(options);

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            token.cancel();
        });

        let start = Instant::now();
        let mut consumer = discard();
        let err = runner.run(&sh("sleep 30"), &mut consumer).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, RunError::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_overall_timeout() {
        let runner = Runner::new(RunOptions {
            overall_timeout: Some(Duration::from_millis(300)),
            grace_period: Duration::from_millis(500),
            ..RunOptions::default()
        });
        let mut consumer = discard();
        let err = runner
            .run(&sh("echo started; sleep 30"), &mut consumer)
            .unwrap_err();
        match err {
            RunError::TimedOut { kind, result } => {
                assert_eq!(kind, TimeoutKind::Overall);
                assert_eq!(result.text(Stream::Stdout), "started");
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[test]
    fn test_idle_timeout() {
        let runner = Runner::new(RunOptions {
            idle_timeout: Some(Duration::from_millis(300)),
            grace_period: Duration::from_millis(500),
            ..RunOptions::default()
        });
        let mut consumer = discard();
        let err = runner.run(&sh("sleep 30"), &mut consumer).unwrap_err();
        assert!(matches!(
            err,
            RunError::TimedOut {
                kind: TimeoutKind::Idle,
                ..
            }
        ));
    }

    #[test]
    fn test_killed_by_signal() {
        let mut consumer = discard();
        let err = Runner::default()
            .run(&sh("kill -9 $$"), &mut consumer)
            .unwrap_err();
        match err {
            RunError::Terminated { signal, result } => {
                assert_eq!(signal, "SIGKILL");
                assert_eq!(result.exit_code, None);
            }
            other => panic!("expected Terminated, got {other:?}"),
        }
    }

    #[test]
    fn test_working_dir() {
        let dir = std::env::temp_dir();
        let runner = Runner::new(RunOptions {
            working_dir: Some(dir.clone()),
            ..RunOptions::default()
        });
        let mut consumer = discard();
        let result = runner.run(&sh("pwd -P"), &mut consumer).unwrap();
        let expected = dir.canonicalize().unwrap();
        assert_eq!(result.text(Stream::Stdout), expected.to_string_lossy());
    }

    #[test]
    fn test_timeout_kind_subkind() {
        assert_eq!(TimeoutKind::Overall.failure_subkind(), "TIMEOUT_OVERALL");
        assert_eq!(TimeoutKind::Idle.failure_subkind(), "TIMEOUT_IDLE");
    }
}
