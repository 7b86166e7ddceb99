//! Child process helpers shared by the recorder.
//!
//! Commands are created without a console window on Windows, and waits can be
//! interrupted by a shutdown future. A stopped child is first asked to exit
//! (SIGTERM on unix) and only killed once its grace period runs out.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` that never opens a console window and
/// is killed if its handle is dropped while the child is still running.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// How a waited-on child process ended.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child exited on its own. `None` means it was terminated by a signal.
    Exited(Option<i32>),
    /// The stop future resolved first and the child was asked to stop.
    Stopped(Option<i32>),
}

#[cfg(feature = "tokio")]
impl WaitOutcome {
    /// Exit code, if one was reported.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) | Self::Stopped(code) => *code,
        }
    }

    /// Whether the child was stopped on request.
    pub fn was_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

/// Ask `child` to exit (SIGTERM on unix).
///
/// Returns `false` when no graceful request could be sent, in which case the
/// caller should kill right away.
#[cfg(feature = "tokio")]
pub fn request_terminate(child: &tokio::process::Child) -> bool {
    let Some(pid) = child.id() else {
        // Already reaped.
        return true;
    };

    send_term(pid)
}

#[cfg(all(feature = "tokio", unix))]
fn send_term(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    i32::try_from(pid)
        .ok()
        .is_some_and(|pid| kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok())
}

#[cfg(all(feature = "tokio", not(unix)))]
fn send_term(_pid: u32) -> bool {
    false
}

/// Wait for `child` to exit, or stop it once `stop` resolves.
///
/// Stopping sends a termination request and gives the child `grace` to exit.
/// If it is still running after that it is killed and gets `kill_timeout` to
/// be reaped; if it is still around after that the outcome reports no exit
/// code.
#[cfg(feature = "tokio")]
pub async fn wait_or_stop<F>(
    child: &mut tokio::process::Child,
    stop: F,
    grace: std::time::Duration,
    kill_timeout: std::time::Duration,
) -> std::io::Result<WaitOutcome>
where
    F: std::future::Future<Output = ()>,
{
    tokio::select! {
        status = child.wait() => Ok(WaitOutcome::Exited(status?.code())),
        _ = stop => {
            if request_terminate(child)
                && let Ok(status) = tokio::time::timeout(grace, child.wait()).await
            {
                return Ok(WaitOutcome::Stopped(status?.code()));
            }

            // Already exited between the checks is fine.
            let _ = child.start_kill();
            match tokio::time::timeout(kill_timeout, child.wait()).await {
                Ok(status) => Ok(WaitOutcome::Stopped(status?.code())),
                Err(_) => Ok(WaitOutcome::Stopped(None)),
            }
        }
    }
}

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::time::Duration;

    const GRACE: Duration = Duration::from_secs(2);
    const KILL: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let mut child = tokio_command("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let outcome = wait_or_stop(&mut child, std::future::pending(), GRACE, KILL)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Exited(Some(3)));
        assert!(!outcome.was_stopped());
    }

    #[tokio::test]
    async fn test_stop_lets_child_run_its_term_handler() {
        let dir = std::env::temp_dir().join(format!("process-utils-term-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let marker = dir.join("flushed");
        let _ = std::fs::remove_file(&marker);

        let script = format!(
            "trap 'echo flushed > \"{}\"; exit 0' TERM; sleep 30 & wait",
            marker.display()
        );
        let mut child = tokio_command("sh").args(["-c", &script]).spawn().unwrap();

        let outcome = wait_or_stop(
            &mut child,
            tokio::time::sleep(Duration::from_millis(200)),
            GRACE,
            KILL,
        )
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Stopped(Some(0)));
        assert!(marker.exists(), "TERM handler did not run");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_stop_escalates_when_term_is_ignored() {
        let mut child = tokio_command("sh")
            .args(["-c", "trap '' TERM; while :; do sleep 1; done"])
            .spawn()
            .unwrap();

        let start = std::time::Instant::now();
        let outcome = wait_or_stop(
            &mut child,
            tokio::time::sleep(Duration::from_millis(200)),
            Duration::from_millis(300),
            KILL,
        )
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Stopped(None));
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
