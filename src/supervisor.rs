//! Worker process lifecycle: launch, liveness and the stop protocol.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::coordinator::{ControllerEvent, SessionId};
use crate::log;
use crate::logging::Logger;
use crate::signal::{Marker, SignalChannel};
use crate::session::ExerciseKind;

const WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// A running worker as seen by the controller.
pub trait WorkerProcess {
    fn id(&self) -> u32;
    fn is_alive(&mut self) -> bool;
    /// Wait up to `timeout` for the process to exit. `Ok(true)` once it has.
    fn wait_timeout(&mut self, timeout: Duration) -> Result<bool>;
    fn kill(&mut self) -> Result<()>;
}

pub trait WorkerLauncher {
    type Process: WorkerProcess;

    /// Start a worker for `kind`. When it exits, `WorkerExited(session)` is
    /// posted to `events` exactly once.
    fn launch(
        &mut self,
        kind: ExerciseKind,
        session: SessionId,
        events: &Sender<ControllerEvent>,
    ) -> Result<Self::Process>;
}

/// Spawns `rep_worker --exercise <kind> --config <path>`.
pub struct ProcessLauncher {
    worker_bin: PathBuf,
    config_path: PathBuf,
    logger: Logger,
}

impl ProcessLauncher {
    pub fn new(worker_bin: Option<PathBuf>, config_path: PathBuf, logger: Logger) -> Result<Self> {
        let worker_bin = match worker_bin {
            Some(path) => path,
            None => default_worker_bin()?,
        };
        Ok(Self {
            worker_bin,
            config_path,
            logger,
        })
    }

    pub fn worker_bin(&self) -> &Path {
        &self.worker_bin
    }
}

/// `rep_worker` next to the running controller
fn default_worker_bin() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate controller executable")?;
    let dir = exe
        .parent()
        .context("controller executable has no parent directory")?;
    Ok(dir.join(format!("rep_worker{}", std::env::consts::EXE_SUFFIX)))
}

impl WorkerLauncher for ProcessLauncher {
    type Process = ChildProcess;

    fn launch(
        &mut self,
        kind: ExerciseKind,
        session: SessionId,
        events: &Sender<ControllerEvent>,
    ) -> Result<ChildProcess> {
        if !self.worker_bin.exists() {
            bail!("worker executable not found: {}", self.worker_bin.display());
        }
        let child = Command::new(&self.worker_bin)
            .arg("--exercise")
            .arg(kind.name())
            .arg("--config")
            .arg(&self.config_path)
            // コンソールの入力はコントローラが使う
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.worker_bin.display()))?;
        log!(self.logger, "[worker] started {} (pid {})", kind, child.id());
        Ok(ChildProcess::watch(child, session, events.clone(), self.logger.clone()))
    }
}

/// A spawned worker plus a watcher thread that reports its exit.
pub struct ChildProcess {
    pid: u32,
    child: Arc<Mutex<Child>>,
}

impl ChildProcess {
    fn watch(
        child: Child,
        session: SessionId,
        events: Sender<ControllerEvent>,
        logger: Logger,
    ) -> Self {
        let pid = child.id();
        let child = Arc::new(Mutex::new(child));
        let watched = Arc::clone(&child);
        thread::spawn(move || loop {
            let status = match watched.lock() {
                Ok(mut child) => child.try_wait(),
                Err(_) => return,
            };
            match status {
                Ok(Some(status)) => {
                    log!(logger, "[worker] pid {} exited ({})", pid, status);
                    let _ = events.send(ControllerEvent::WorkerExited(session));
                    return;
                }
                Ok(None) => thread::sleep(WATCH_INTERVAL),
                Err(e) => {
                    log!(logger, "[worker] cannot wait on pid {}: {e}", pid);
                    let _ = events.send(ControllerEvent::WorkerExited(session));
                    return;
                }
            }
        });
        Self { pid, child }
    }

    fn try_wait(&mut self) -> Result<bool> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| anyhow::anyhow!("worker handle poisoned"))?;
        Ok(child.try_wait()?.is_some())
    }
}

impl WorkerProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        !matches!(self.try_wait(), Ok(true) | Err(_))
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(WATCH_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn kill(&mut self) -> Result<()> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| anyhow::anyhow!("worker handle poisoned"))?;
        child.kill().context("failed to kill worker")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running; no marker was written.
    NotRunning,
    /// Exited on its own within the grace period.
    Graceful,
    /// Needed a kill.
    Killed,
    /// Still alive after the kill grace period.
    Unresponsive,
}

/// Ask the worker to stop, escalating to a kill after `grace`.
///
/// The stop marker is removed on every path, so the next session never sees a
/// leftover one.
pub fn stop_worker<P: WorkerProcess>(
    process: &mut P,
    signals: &SignalChannel,
    grace: Duration,
    kill_grace: Duration,
    logger: &Logger,
) -> StopOutcome {
    if !process.is_alive() {
        // 前回の取り残しも消しておく
        signals.acknowledge(Marker::Stop);
        return StopOutcome::NotRunning;
    }

    signals.raise(Marker::Stop);
    let outcome = match process.wait_timeout(grace) {
        Ok(true) => StopOutcome::Graceful,
        Ok(false) | Err(_) => {
            log!(logger, "[worker] pid {} did not stop in {:?}, killing", process.id(), grace);
            if let Err(e) = process.kill() {
                log!(logger, "[worker] {e:#}");
            }
            match process.wait_timeout(kill_grace) {
                Ok(true) => StopOutcome::Killed,
                _ => {
                    log!(logger, "[worker] pid {} still running after kill", process.id());
                    StopOutcome::Unresponsive
                }
            }
        }
    };
    signals.acknowledge(Marker::Stop);
    outcome
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// How a fake worker reacts to the stop protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Behaviour {
        /// Exits as soon as it is waited on.
        Cooperative,
        /// Only exits when killed.
        Stubborn,
    }

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub alive: bool,
        pub kills: usize,
        pub waits: usize,
    }

    pub struct FakeProcess {
        pub pid: u32,
        pub behaviour: Behaviour,
        pub state: Rc<RefCell<FakeState>>,
    }

    impl FakeProcess {
        pub fn new(pid: u32, behaviour: Behaviour) -> Self {
            Self {
                pid,
                behaviour,
                state: Rc::new(RefCell::new(FakeState {
                    alive: true,
                    ..Default::default()
                })),
            }
        }
    }

    impl WorkerProcess for FakeProcess {
        fn id(&self) -> u32 {
            self.pid
        }

        fn is_alive(&mut self) -> bool {
            self.state.borrow().alive
        }

        fn wait_timeout(&mut self, _timeout: Duration) -> Result<bool> {
            let mut state = self.state.borrow_mut();
            state.waits += 1;
            if self.behaviour == Behaviour::Cooperative {
                state.alive = false;
            }
            Ok(!state.alive)
        }

        fn kill(&mut self) -> Result<()> {
            let mut state = self.state.borrow_mut();
            state.kills += 1;
            state.alive = false;
            Ok(())
        }
    }

    /// Hands out fake processes; each launch is recorded.
    pub struct FakeLauncher {
        pub behaviour: Behaviour,
        pub fail: bool,
        pub launched: Vec<(ExerciseKind, SessionId, Rc<RefCell<FakeState>>)>,
    }

    impl FakeLauncher {
        pub fn new() -> Self {
            Self {
                behaviour: Behaviour::Cooperative,
                fail: false,
                launched: Vec::new(),
            }
        }

        /// Shared state of the most recent process.
        pub fn last(&self) -> Rc<RefCell<FakeState>> {
            Rc::clone(&self.launched.last().expect("nothing launched").2)
        }
    }

    impl WorkerLauncher for FakeLauncher {
        type Process = FakeProcess;

        fn launch(
            &mut self,
            kind: ExerciseKind,
            session: SessionId,
            _events: &Sender<ControllerEvent>,
        ) -> Result<FakeProcess> {
            if self.fail {
                bail!("worker executable not found");
            }
            let process = FakeProcess::new(1000 + self.launched.len() as u32, self.behaviour);
            self.launched.push((kind, session, Rc::clone(&process.state)));
            Ok(process)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Behaviour, FakeProcess};
    use super::*;
    use tempfile::TempDir;

    fn signals() -> (TempDir, SignalChannel) {
        let dir = TempDir::new().unwrap();
        let signals = SignalChannel::new(dir.path(), Logger::stderr_only());
        (dir, signals)
    }

    const GRACE: Duration = Duration::from_millis(10);

    #[test]
    fn test_stop_is_idempotent_when_nothing_runs() {
        let (_dir, signals) = signals();
        let mut process = FakeProcess::new(1, Behaviour::Cooperative);
        process.state.borrow_mut().alive = false;
        signals.raise(Marker::Stop);

        let outcome = stop_worker(&mut process, &signals, GRACE, GRACE, &Logger::stderr_only());
        assert_eq!(outcome, StopOutcome::NotRunning);
        assert!(!signals.is_raised(Marker::Stop));
        assert_eq!(process.state.borrow().waits, 0);
        assert_eq!(process.state.borrow().kills, 0);
    }

    #[test]
    fn test_graceful_stop_removes_marker() {
        let (_dir, signals) = signals();
        let mut process = FakeProcess::new(1, Behaviour::Cooperative);
        let outcome = stop_worker(&mut process, &signals, GRACE, GRACE, &Logger::stderr_only());
        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(process.state.borrow().kills, 0);
        assert!(!signals.is_raised(Marker::Stop));
    }

    #[test]
    fn test_stubborn_worker_is_killed() {
        let (_dir, signals) = signals();
        let mut process = FakeProcess::new(1, Behaviour::Stubborn);
        let outcome = stop_worker(&mut process, &signals, GRACE, GRACE, &Logger::stderr_only());
        assert_eq!(outcome, StopOutcome::Killed);
        assert_eq!(process.state.borrow().kills, 1);
        assert!(!signals.is_raised(Marker::Stop));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_process_reports_exit_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let child = Command::new("true").spawn().unwrap();
        let mut process = ChildProcess::watch(child, 7, tx, Logger::stderr_only());

        assert!(process.wait_timeout(Duration::from_secs(5)).unwrap());
        assert!(!process.is_alive());
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ControllerEvent::WorkerExited(session) => assert_eq!(session, 7),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_launch_fails_without_worker_binary() {
        let (tx, _rx) = std::sync::mpsc::channel();
        let mut launcher = ProcessLauncher::new(
            Some(PathBuf::from("/nonexistent/rep_worker")),
            PathBuf::from("config.toml"),
            Logger::stderr_only(),
        )
        .unwrap();
        assert!(launcher.launch(ExerciseKind::Squat, 1, &tx).is_err());
    }
}
