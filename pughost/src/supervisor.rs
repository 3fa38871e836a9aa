//! Owns the engine subprocess: spawn, watch its output, stop it.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lifecycle::{Interrupt, Interrupter};

/// How long `terminate` waits for the engine to exit after signalling it.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

const BIND_CONFLICT: &str = "address already in use";

fn is_bind_failure(line: &str) -> bool {
    line.to_ascii_lowercase().contains(BIND_CONFLICT)
}

/// Whether an engine log line reports that `control_port` is already taken.
/// Bind failures on other ports (a route's listen port) do not count.
pub fn is_bind_conflict(line: &str, control_port: u16) -> bool {
    let port = format!(":{control_port}");
    is_bind_failure(line)
        && line.match_indices(&port).any(|(at, _)| {
            !line[at + port.len()..].starts_with(|c: char| c.is_ascii_digit())
        })
}

struct ConflictWatch {
    interrupter: Interrupter,
    control_port: u16,
}

struct SupervisedProcess {
    child: Child,
    exit: Option<ExitStatus>,
    signalled: bool,
}

impl SupervisedProcess {
    fn finished(&self) -> bool {
        self.exit.is_some() || self.signalled
    }
}

pub struct Supervisor {
    process: Option<SupervisedProcess>,
    grace: Duration,
    terminations: usize,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("pid", &self.id())
            .field("grace", &self.grace)
            .field("terminations", &self.terminations)
            .finish()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            process: None,
            grace,
            terminations: 0,
        }
    }

    /// Spawn the engine with no arguments. Its stderr is scanned for bind
    /// conflicts on `control_port`, which are forwarded to `interrupter`.
    pub fn launch(
        &mut self,
        path: &Path,
        control_port: u16,
        interrupter: Interrupter,
    ) -> Result<()> {
        if self.process.is_some() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "engine already launched",
            )));
        }

        let mut child = Command::new(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::EngineLaunch {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout", None));
        }
        if let Some(stderr) = child.stderr.take() {
            let watch = ConflictWatch {
                interrupter,
                control_port,
            };
            tokio::spawn(forward_lines(stderr, "stderr", Some(watch)));
        }

        info!(pid = child.id(), path = %path.display(), "engine launched");

        self.process = Some(SupervisedProcess {
            child,
            exit: None,
            signalled: false,
        });

        Ok(())
    }

    pub fn id(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    /// Number of times `terminate` actually stopped a live engine.
    pub fn terminations(&self) -> usize {
        self.terminations
    }

    /// Ask the engine to stop (SIGTERM on unix) and wait up to the grace
    /// period for it to exit, killing it if it does not.
    ///
    /// Returns `true` only if a running engine was signalled. Calling this
    /// again, after the engine exited on its own, or before any launch is a
    /// no-op.
    pub async fn terminate(&mut self) -> bool {
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        if process.finished() {
            return false;
        }

        if let Ok(Some(status)) = process.child.try_wait() {
            debug!(%status, "engine already exited");
            process.exit = Some(status);
            return false;
        }

        process.signalled = true;
        self.terminations += 1;

        let stopped = match request_stop(&mut process.child) {
            Ok(()) => match tokio::time::timeout(self.grace, process.child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(err)) => {
                    warn!("Failed to reap engine: {err}");
                    None
                }
                Err(_) => {
                    warn!("Engine did not exit within {:?}, killing it", self.grace);
                    None
                }
            },
            Err(err) => {
                warn!("Failed to ask engine to stop: {err}");
                None
            }
        };

        match stopped {
            Some(status) => {
                info!(%status, "engine stopped");
                process.exit = Some(status);
            }
            None => match process.child.kill().await {
                Ok(()) => info!("engine killed"),
                Err(err) => warn!("Failed to kill engine: {err}"),
            },
        }

        true
    }

    /// Resolves when the engine exits on its own. Pending forever if nothing
    /// was launched or the engine has already been stopped.
    pub async fn exited(&mut self) -> io::Result<ExitStatus> {
        match self.process.as_mut() {
            Some(process) if !process.finished() => {
                let status = process.child.wait().await?;
                process.exit = Some(status);
                Ok(status)
            }
            _ => std::future::pending().await,
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "engine already reaped"))?;
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    Ok(())
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

async fn forward_lines<R>(reader: R, stream: &'static str, watch: Option<ConflictWatch>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "pughost::engine", stream, "{line}");
                if let Some(watch) = &watch {
                    if is_bind_conflict(&line, watch.control_port) {
                        warn!("Engine reported a bind conflict: {line}");
                        watch.interrupter.send(Interrupt::BindConflict(line));
                    } else if is_bind_failure(&line) {
                        warn!("Engine could not bind a listener: {line}");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(target: "pughost::engine", stream, "output closed: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_conflict_signature() {
        assert!(is_bind_conflict(
            "listen tcp 127.0.0.1:8474: bind: address already in use",
            8474
        ));
        assert!(is_bind_conflict("ERROR: [::]:8474 Address Already In Use", 8474));
        assert!(!is_bind_conflict(
            "API HTTP server starting host=localhost port=8474",
            8474
        ));
    }

    #[test]
    fn test_bind_failure_on_other_port_is_not_a_conflict() {
        let line = "listen tcp 127.0.0.1:3001: bind: address already in use";
        assert!(!is_bind_conflict(line, 8474));
        assert!(!is_bind_conflict(
            "listen tcp 127.0.0.1:84741: bind: address already in use",
            8474
        ));
        assert!(is_bind_failure(line));
    }

    #[tokio::test]
    async fn test_terminate_without_launch_is_noop() {
        let mut supervisor = Supervisor::default();
        assert!(!supervisor.terminate().await);
        assert!(!supervisor.terminate().await);
        assert_eq!(supervisor.terminations(), 0);
        assert_eq!(supervisor.id(), None);
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let (interrupter, _inbox) = Interrupter::channel();
        let mut supervisor = Supervisor::default();
        let err = supervisor
            .launch(Path::new("/nonexistent/toxiproxy-server"), 8474, interrupter)
            .unwrap_err();
        assert!(matches!(err, Error::EngineLaunch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let engine = crate::test_utils::fake_engine("exec sleep 30").unwrap();
        let (interrupter, _inbox) = Interrupter::channel();
        let mut supervisor = Supervisor::default();
        supervisor.launch(engine.path(), 8474, interrupter).unwrap();
        assert!(supervisor.id().is_some());

        assert!(supervisor.terminate().await);
        assert!(!supervisor.terminate().await);
        assert_eq!(supervisor.terminations(), 1);
    }

    #[cfg(unix)]
    async fn wait_for_file(path: &Path) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("engine never reached its trap");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_lets_engine_exit_gracefully() {
        let engine = crate::test_utils::fake_engine(
            "trap 'touch \"$0.term\"; exit 0' TERM\ntouch \"$0.ready\"\nwhile :; do sleep 0.1; done",
        )
        .unwrap();
        let (interrupter, _inbox) = Interrupter::channel();
        let mut supervisor = Supervisor::default();
        supervisor.launch(engine.path(), 8474, interrupter).unwrap();
        wait_for_file(&engine.path().with_extension("ready")).await;

        assert!(supervisor.terminate().await);

        assert!(engine.path().with_extension("term").exists());
        let status = supervisor.process.as_ref().and_then(|p| p.exit);
        assert_eq!(status.and_then(|s| s.code()), Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_engine_ignoring_term() {
        let engine = crate::test_utils::fake_engine(
            "trap '' TERM\ntouch \"$0.ready\"\nwhile :; do sleep 0.1; done",
        )
        .unwrap();
        let (interrupter, _inbox) = Interrupter::channel();
        let mut supervisor = Supervisor::new(Duration::from_millis(300));
        supervisor.launch(engine.path(), 8474, interrupter).unwrap();
        wait_for_file(&engine.path().with_extension("ready")).await;

        let stopped = tokio::time::timeout(Duration::from_secs(5), supervisor.terminate())
            .await
            .expect("kill after grace did not stop the engine");

        assert!(stopped);
        assert_eq!(supervisor.terminations(), 1);
        assert!(!supervisor.terminate().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_conflict_is_forwarded() {
        let engine = crate::test_utils::fake_engine(
            "echo 'listen tcp 127.0.0.1:8474: bind: address already in use' >&2\nexec sleep 30",
        )
        .unwrap();
        let (interrupter, mut inbox) = Interrupter::channel();
        let mut supervisor = Supervisor::default();
        supervisor.launch(engine.path(), 8474, interrupter).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("timeout")
            .expect("inbox closed");
        assert!(matches!(event, Interrupt::BindConflict(line) if line.contains("8474")));

        supervisor.terminate().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_reports_status() {
        let engine = crate::test_utils::fake_engine("exit 3").unwrap();
        let (interrupter, _inbox) = Interrupter::channel();
        let mut supervisor = Supervisor::default();
        supervisor.launch(engine.path(), 8474, interrupter).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), supervisor.exited())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(!supervisor.terminate().await);
        assert_eq!(supervisor.terminations(), 0);
    }
}
