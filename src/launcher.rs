//! Emulator process supervision.
//!
//! The emulator is started as a child process and watched by up to two
//! timers: a soft one that asks it to quit (SIGTERM) and a hard one that
//! kills it outright. The launching thread waits for the child; whichever
//! timers have not fired by then are cancelled.

use std::fs;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Reported when the soft timeout fired before the child exited.
pub const SOFT_TIMEOUT_CODE: i32 = 124;
/// Reported when the hard timeout fired before the child exited.
pub const HARD_TIMEOUT_CODE: i32 = 137;

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own with this code (`128 + signal` if it died from a
    /// signal the harness did not send).
    Exited(i32),
    SoftTimeout,
    HardTimeout,
}

impl Termination {
    pub fn code(&self) -> i32 {
        match self {
            Termination::Exited(code) => *code,
            Termination::SoftTimeout => SOFT_TIMEOUT_CODE,
            Termination::HardTimeout => HARD_TIMEOUT_CODE,
        }
    }
}

/// Size and modification time of a log file, taken before launch so a
/// file the emulator never touched is not mistaken for its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl LogStamp {
    /// Stamp of the file at `path`, or `None` if there is none.
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(LogStamp {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Result of one emulator run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Raw serial capture, byte for byte; empty if none was produced.
    pub output: Vec<u8>,
    /// Termination code, see [`Termination::code`].
    pub code: i32,
    /// Whether this run wrote a log file at all.
    pub log_produced: bool,
    pub duration: Duration,
}

impl RunOutcome {
    /// Read the serial capture at `log` after the child is gone. `before`
    /// is the stamp of a log left over from an earlier run, if any; a file
    /// still matching it was not written by this run.
    pub fn capture(
        log: &Path,
        before: Option<LogStamp>,
        code: i32,
        duration: Duration,
    ) -> Result<Self> {
        let after = LogStamp::of(log);
        let fresh = match (before, after) {
            (_, None) => false,
            (Some(before), Some(after)) => before != after,
            (None, Some(_)) => true,
        };
        if !fresh {
            warn!(path = %log.display(), "no serial log written by this run");
            return Ok(RunOutcome {
                output: Vec::new(),
                code,
                log_produced: false,
                duration,
            });
        }
        let output =
            fs::read(log).with_context(|| format!("Failed to read log {}", log.display()))?;
        Ok(RunOutcome {
            output,
            code,
            log_produced: true,
            duration,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    /// Deliver the signal if the child is still running. Holding the lock
    /// across the check keeps the launcher from reaping it in between.
    fn deliver(self, child: &Mutex<Child>) -> bool {
        let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(child.try_wait(), Ok(None)) {
            return false;
        }
        let sent = match self {
            Signal::Terminate => terminate(&mut child),
            Signal::Kill => child.kill().is_ok(),
        };
        if sent {
            info!(pid = child.id(), signal = ?self, "timeout reached, signalled emulator");
        }
        sent
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> bool {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    // SAFETY: `pid` belongs to a child we have not reaped yet.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> bool {
    child.kill().is_ok()
}

/// A delayed signal that can be called off.
struct Watcher {
    cancel: Sender<()>,
    handle: JoinHandle<bool>,
}

impl Watcher {
    fn arm(after: Duration, child: Arc<Mutex<Child>>, signal: Signal) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = thread::spawn(move || match cancelled.recv_timeout(after) {
            Err(RecvTimeoutError::Timeout) => signal.deliver(&child),
            // Sender dropped or message received: cancelled.
            _ => false,
        });
        Watcher { cancel, handle }
    }

    /// Cancel the watcher and report whether it had already fired.
    fn finish(self) -> bool {
        drop(self.cancel);
        self.handle.join().unwrap_or(false)
    }
}

/// Runs a child under the soft/hard timeout policy.
#[derive(Debug, Clone)]
pub struct Launcher {
    pub soft_timeout: Option<Duration>,
    pub hard_timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Launcher {
    pub fn new(soft_timeout: Option<Duration>, hard_timeout: Option<Duration>) -> Self {
        Self {
            soft_timeout,
            hard_timeout,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Spawn `command` and block until it exits or is killed.
    pub fn launch(&self, command: &mut Command) -> Result<(Termination, Duration)> {
        let start = Instant::now();
        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", command.get_program()))?;
        info!(
            pid = child.id(),
            soft = ?self.soft_timeout,
            hard = ?self.hard_timeout,
            "emulator started"
        );

        let child = Arc::new(Mutex::new(child));
        let soft = self
            .soft_timeout
            .map(|after| Watcher::arm(after, Arc::clone(&child), Signal::Terminate));
        let hard = self
            .hard_timeout
            .map(|after| Watcher::arm(after, Arc::clone(&child), Signal::Kill));

        let waited = self.wait(&child);

        let soft_fired = soft.map(Watcher::finish).unwrap_or(false);
        let hard_fired = hard.map(Watcher::finish).unwrap_or(false);
        let status = waited?;

        let termination = if hard_fired {
            Termination::HardTimeout
        } else if soft_fired {
            Termination::SoftTimeout
        } else {
            Termination::Exited(exit_code(status))
        };
        let duration = start.elapsed();
        debug!(?termination, ?status, ?duration, "emulator exited");
        Ok((termination, duration))
    }

    fn wait(&self, child: &Mutex<Child>) -> Result<ExitStatus> {
        loop {
            let polled = child
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_wait()
                .context("Failed to wait for emulator")?;
            if let Some(status) = polled {
                return Ok(status);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    #[test]
    fn test_natural_exit_code_is_surfaced() {
        let launcher = Launcher::new(Some(Duration::from_secs(5)), Some(Duration::from_secs(10)));
        let (termination, duration) = launcher.launch(&mut sh("exit 3")).unwrap();
        assert_eq!(termination, Termination::Exited(3));
        assert_eq!(termination.code(), 3);
        assert!(duration < Duration::from_secs(5));
    }

    #[test]
    fn test_soft_timeout_when_signal_honoured() {
        let launcher = Launcher::new(Some(Duration::from_secs(1)), Some(Duration::from_secs(2)));
        let start = Instant::now();
        let (termination, _) = launcher.launch(&mut sh("exec sleep 60")).unwrap();
        assert_eq!(termination, Termination::SoftTimeout);
        assert_eq!(termination.code(), SOFT_TIMEOUT_CODE);
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[test]
    fn test_hard_timeout_when_signal_ignored() {
        let launcher = Launcher::new(Some(Duration::from_secs(1)), Some(Duration::from_secs(2)));
        let start = Instant::now();
        let (termination, _) = launcher
            .launch(&mut sh("trap '' TERM; while :; do sleep 1; done"))
            .unwrap();
        assert_eq!(termination, Termination::HardTimeout);
        assert_eq!(termination.code(), HARD_TIMEOUT_CODE);
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[test]
    fn test_only_hard_timeout() {
        let launcher = Launcher::new(None, Some(Duration::from_millis(500)));
        let (termination, _) = launcher.launch(&mut sh("exec sleep 60")).unwrap();
        assert_eq!(termination, Termination::HardTimeout);
    }

    #[test]
    fn test_no_timeouts_waits_for_child() {
        let launcher = Launcher::new(None, None);
        let (termination, _) = launcher.launch(&mut sh("sleep 0.2; exit 0")).unwrap();
        assert_eq!(termination, Termination::Exited(0));
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let launcher = Launcher::new(None, None);
        let mut cmd = Command::new("/nonexistent/emulator");
        assert!(launcher.launch(&mut cmd).is_err());
    }

    #[test]
    fn test_capture_missing_and_present_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");

        let missing = RunOutcome::capture(&log, None, 0, Duration::ZERO).unwrap();
        assert!(!missing.log_produced);
        assert!(missing.output.is_empty());

        fs::write(&log, b"hello\xffworld").unwrap();
        let present = RunOutcome::capture(&log, None, 7, Duration::ZERO).unwrap();
        assert!(present.log_produced);
        assert_eq!(present.code, 7);
        assert_eq!(present.output, b"hello\xffworld");
    }

    #[test]
    fn test_capture_ignores_untouched_stale_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");
        fs::write(&log, b"<run><log>old</log>\n<lres>0</lres></run>\n").unwrap();
        let before = LogStamp::of(&log);
        assert!(before.is_some());

        let stale = RunOutcome::capture(&log, before, 1, Duration::ZERO).unwrap();
        assert!(!stale.log_produced);
        assert!(stale.output.is_empty());

        fs::write(&log, b"new serial output").unwrap();
        let fresh = RunOutcome::capture(&log, before, 0, Duration::ZERO).unwrap();
        assert!(fresh.log_produced);
        assert_eq!(fresh.output, b"new serial output");
    }
}
