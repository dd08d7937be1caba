//! Registry of hosted processes.
//!
//! One entry per target; an entry whose process has exited stays in the
//! registry (so its exit can still be reported) until the target is started
//! again or stopped.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    domain::TargetId,
    envfile,
    errors::Error,
    formatting::tail_chars,
    ports::{ExitInfo, LaunchSpec, ProcessHandle, ScriptLauncher},
    workspace::Workspace,
    Result,
};

/// Max chars of the log shown when an app dies during startup.
pub const CRASH_LOG_TAIL: usize = 2000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started { pid: Option<u32> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settled {
    Running,
    Crashed { code: Option<i32>, log_tail: String },
}

struct RunningProcess {
    handle: Box<dyn ProcessHandle>,
    log_path: PathBuf,
    started_at: Instant,
}

impl RunningProcess {
    fn is_alive(&mut self, target: &TargetId) -> bool {
        match self.handle.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!(target = %target, error = %e, "failed to poll hosted process");
                false
            }
        }
    }
}

#[derive(Default)]
struct Table {
    procs: HashMap<TargetId, RunningProcess>,
    /// Targets whose process group is being terminated outside the lock.
    stopping: HashSet<TargetId>,
}

pub struct Supervisor {
    workspace: Workspace,
    launcher: Arc<dyn ScriptLauncher>,
    python: PathBuf,
    stop_timeout: Duration,
    table: Mutex<Table>,
}

impl Supervisor {
    pub fn new(
        workspace: Workspace,
        launcher: Arc<dyn ScriptLauncher>,
        python: impl Into<PathBuf>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            workspace,
            launcher,
            python: python.into(),
            stop_timeout,
            table: Mutex::new(Table::default()),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Alive, or still being stopped.
    pub async fn is_running(&self, target: &TargetId) -> bool {
        let mut table = self.table.lock().await;
        if table.stopping.contains(target) {
            return true;
        }
        table
            .procs
            .get_mut(target)
            .map(|p| p.is_alive(target))
            .unwrap_or(false)
    }

    /// How long a running target has been up.
    pub async fn uptime(&self, target: &TargetId) -> Option<Duration> {
        let mut table = self.table.lock().await;
        let p = table.procs.get_mut(target)?;
        if p.is_alive(target) {
            Some(p.started_at.elapsed())
        } else {
            None
        }
    }

    pub async fn start(&self, target: &TargetId) -> Result<StartOutcome> {
        let mut table = self.table.lock().await;
        if table.stopping.contains(target) {
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(p) = table.procs.get_mut(target) {
            if p.is_alive(target) {
                return Ok(StartOutcome::AlreadyRunning);
            }
        }

        let paths = self.workspace.paths(target);
        let script = paths.script_abs();
        if !script.is_file() {
            return Err(Error::NotFound(script));
        }

        let spec = LaunchSpec {
            program: self.python.clone(),
            args: vec![
                "-u".to_string(),
                paths.script.to_string_lossy().to_string(),
            ],
            cwd: paths.work_dir.clone(),
            env_overrides: envfile::load(&paths.env_file)?,
            log_path: paths.log_file.clone(),
        };

        let handle = self.launcher.launch(spec).await?;
        let pid = handle.pid();
        info!(target = %target, pid = ?pid, "hosted app started");

        table.procs.insert(
            target.clone(),
            RunningProcess {
                handle,
                log_path: paths.log_file,
                started_at: Instant::now(),
            },
        );
        Ok(StartOutcome::Started { pid })
    }

    /// Wait out the startup grace period and report whether the app survived it.
    pub async fn settle(&self, target: &TargetId, grace: Duration) -> Settled {
        tokio::time::sleep(grace).await;

        let mut table = self.table.lock().await;
        let (exit, log_path) = match table.procs.get_mut(target) {
            Some(p) => match p.handle.try_wait() {
                Ok(None) => return Settled::Running,
                Ok(Some(exit)) => (Some(exit), p.log_path.clone()),
                Err(e) => {
                    warn!(target = %target, error = %e, "failed to poll hosted process");
                    (None, p.log_path.clone())
                }
            },
            None => (None, self.workspace.paths(target).log_file),
        };
        drop(table);

        let code = exit.and_then(|e| e.code);
        warn!(target = %target, code = ?code, "hosted app exited during startup");
        Settled::Crashed {
            code,
            log_tail: read_log_tail(&log_path, CRASH_LOG_TAIL),
        }
    }

    /// Stop a running target. Returns `false` if it was not running.
    pub async fn stop(&self, target: &TargetId) -> Result<bool> {
        let mut proc = {
            let mut table = self.table.lock().await;
            if table.stopping.contains(target) {
                return Ok(false);
            }
            let alive = table
                .procs
                .get_mut(target)
                .map(|p| p.is_alive(target))
                .unwrap_or(false);
            if !alive {
                return Ok(false);
            }
            let Some(p) = table.procs.remove(target) else {
                return Ok(false);
            };
            table.stopping.insert(target.clone());
            p
        };

        let result = proc.handle.terminate(self.stop_timeout).await;

        let mut table = self.table.lock().await;
        table.stopping.remove(target);
        match result {
            Ok(ExitInfo { code }) => {
                info!(target = %target, code = ?code, "hosted app stopped");
                Ok(true)
            }
            Err(e) => {
                // Keep tracking it so a later stop can retry.
                table.procs.entry(target.clone()).or_insert(proc);
                Err(e)
            }
        }
    }

    /// Forget a target entirely (stopping it first if needed).
    pub async fn forget(&self, target: &TargetId) -> Result<()> {
        self.stop(target).await?;
        self.table.lock().await.procs.remove(target);
        Ok(())
    }

    pub async fn running_targets(&self) -> Vec<TargetId> {
        let mut table = self.table.lock().await;
        let mut out: Vec<TargetId> = table
            .procs
            .iter_mut()
            .filter_map(|(t, p)| if p.is_alive(t) { Some(t.clone()) } else { None })
            .collect();
        out.sort();
        out
    }

    pub async fn running_count(&self) -> usize {
        self.running_targets().await.len()
    }

    /// Terminate every running app (used on shutdown).
    pub async fn stop_all(&self) {
        for target in self.running_targets().await {
            if let Err(e) = self.stop(&target).await {
                warn!(target = %target, error = %e, "failed to stop hosted app on shutdown");
            }
        }
    }
}

/// Last `max_chars` of a log file, lossily decoded.
pub fn read_log_tail(path: &std::path::Path, max_chars: usize) -> String {
    match fs::read(path) {
        Ok(bytes) => tail_chars(&String::from_utf8_lossy(&bytes), max_chars).to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Mutex as StdMutex,
    };

    use async_trait::async_trait;

    use super::*;

    /// Shared switchboard for fake processes.
    #[derive(Default)]
    pub struct FakeState {
        pub exited: AtomicBool,
        pub terminated: AtomicBool,
        pub fail_terminate: AtomicBool,
        pub terminate_delay_ms: AtomicU64,
    }

    pub struct FakeHandle {
        pid: u32,
        state: Arc<FakeState>,
        exit_code: Option<i32>,
    }

    #[async_trait]
    impl ProcessHandle for FakeHandle {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn try_wait(&mut self) -> Result<Option<ExitInfo>> {
            if self.state.exited.load(Ordering::SeqCst) {
                Ok(Some(ExitInfo {
                    code: self.exit_code,
                }))
            } else {
                Ok(None)
            }
        }

        async fn terminate(&mut self, _timeout: Duration) -> Result<ExitInfo> {
            let delay = self.state.terminate_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.state.fail_terminate.load(Ordering::SeqCst) {
                return Err(Error::External("kill failed".to_string()));
            }
            self.state.terminated.store(true, Ordering::SeqCst);
            self.state.exited.store(true, Ordering::SeqCst);
            Ok(ExitInfo { code: None })
        }
    }

    /// Launcher that records specs and writes `log_line` into the log file.
    #[derive(Default)]
    pub struct FakeLauncher {
        pub specs: StdMutex<Vec<LaunchSpec>>,
        pub states: StdMutex<Vec<Arc<FakeState>>>,
        pub next_pid: AtomicU32,
        pub crash_immediately: AtomicBool,
        pub log_line: StdMutex<String>,
    }

    impl FakeLauncher {
        pub fn last_state(&self) -> Arc<FakeState> {
            self.states.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ScriptLauncher for FakeLauncher {
        async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
            fs::write(&spec.log_path, self.log_line.lock().unwrap().as_bytes())?;
            self.specs.lock().unwrap().push(spec);
            let state = Arc::new(FakeState::default());
            if self.crash_immediately.load(Ordering::SeqCst) {
                state.exited.store(true, Ordering::SeqCst);
            }
            self.states.lock().unwrap().push(state.clone());
            Ok(Box::new(FakeHandle {
                pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
                state,
                exit_code: Some(1),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::FakeLauncher;
    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<FakeLauncher>, Supervisor) {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let sup = Supervisor::new(
            Workspace::new(dir.path()),
            launcher.clone(),
            "python3",
            Duration::from_secs(1),
        );
        (dir, launcher, sup)
    }

    #[tokio::test]
    async fn start_builds_launch_spec_from_layout() {
        let (dir, launcher, sup) = setup();
        fs::create_dir_all(dir.path().join("repo/src")).unwrap();
        fs::write(dir.path().join("repo/src/main.py"), "print(1)").unwrap();
        fs::write(dir.path().join("repo/.env"), "API_KEY = abc\n# x\n").unwrap();
        let t = TargetId::parse("repo|src/main.py").unwrap();

        let out = sup.start(&t).await.unwrap();
        assert_eq!(out, StartOutcome::Started { pid: Some(1000) });

        let spec = launcher.specs.lock().unwrap()[0].clone();
        assert_eq!(spec.program, PathBuf::from("python3"));
        assert_eq!(spec.args, vec!["-u", "src/main.py"]);
        assert_eq!(spec.cwd, dir.path().join("repo"));
        assert_eq!(spec.env_overrides.get("API_KEY").map(String::as_str), Some("abc"));
        assert_eq!(spec.log_path, dir.path().join("repo_src_main.py.log"));
        assert!(sup.is_running(&t).await);
    }

    #[tokio::test]
    async fn second_start_reports_already_running() {
        let (dir, launcher, sup) = setup();
        fs::write(dir.path().join("bot.py"), "").unwrap();
        let t = TargetId::parse("bot.py").unwrap();

        sup.start(&t).await.unwrap();
        assert_eq!(sup.start(&t).await.unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(launcher.specs.lock().unwrap().len(), 1);

        // Once it exits, a new start relaunches.
        launcher.last_state().exited.store(true, Ordering::SeqCst);
        assert!(!sup.is_running(&t).await);
        assert!(matches!(
            sup.start(&t).await.unwrap(),
            StartOutcome::Started { .. }
        ));
        assert_eq!(launcher.specs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_script_is_an_error() {
        let (_dir, _launcher, sup) = setup();
        let t = TargetId::parse("ghost.py").unwrap();
        assert!(matches!(sup.start(&t).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn settle_reports_crash_with_log_tail() {
        let (dir, launcher, sup) = setup();
        fs::write(dir.path().join("bot.py"), "").unwrap();
        launcher.crash_immediately.store(true, Ordering::SeqCst);
        *launcher.log_line.lock().unwrap() =
            format!("{}Traceback: boom", "x".repeat(3_000));
        let t = TargetId::parse("bot.py").unwrap();

        sup.start(&t).await.unwrap();
        match sup.settle(&t, Duration::from_millis(1)).await {
            Settled::Crashed { code, log_tail } => {
                assert_eq!(code, Some(1));
                assert_eq!(log_tail.chars().count(), CRASH_LOG_TAIL);
                assert!(log_tail.ends_with("Traceback: boom"));
            }
            Settled::Running => panic!("expected crash"),
        }
    }

    #[tokio::test]
    async fn settle_reports_running() {
        let (dir, _launcher, sup) = setup();
        fs::write(dir.path().join("bot.py"), "").unwrap();
        let t = TargetId::parse("bot.py").unwrap();
        sup.start(&t).await.unwrap();
        assert_eq!(
            sup.settle(&t, Duration::from_millis(1)).await,
            Settled::Running
        );
    }

    #[tokio::test]
    async fn stop_terminates_and_reports() {
        let (dir, launcher, sup) = setup();
        fs::write(dir.path().join("bot.py"), "").unwrap();
        let t = TargetId::parse("bot.py").unwrap();

        assert!(!sup.stop(&t).await.unwrap());
        sup.start(&t).await.unwrap();
        assert!(sup.stop(&t).await.unwrap());
        assert!(launcher.last_state().terminated.load(Ordering::SeqCst));
        assert!(!sup.is_running(&t).await);
        assert!(!sup.stop(&t).await.unwrap());
    }

    #[tokio::test]
    async fn failed_stop_keeps_tracking_the_process() {
        let (dir, launcher, sup) = setup();
        fs::write(dir.path().join("bot.py"), "").unwrap();
        let t = TargetId::parse("bot.py").unwrap();
        sup.start(&t).await.unwrap();
        launcher
            .last_state()
            .fail_terminate
            .store(true, Ordering::SeqCst);

        assert!(sup.stop(&t).await.is_err());
        assert!(sup.is_running(&t).await);
    }

    #[tokio::test]
    async fn start_during_slow_stop_does_not_launch_a_second_copy() {
        let (dir, launcher, sup) = setup();
        let sup = Arc::new(sup);
        fs::write(dir.path().join("bot.py"), "").unwrap();
        let t = TargetId::parse("bot.py").unwrap();
        sup.start(&t).await.unwrap();
        launcher
            .last_state()
            .terminate_delay_ms
            .store(300, Ordering::SeqCst);

        let stopping = {
            let (sup, t) = (sup.clone(), t.clone());
            tokio::spawn(async move { sup.stop(&t).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sup.is_running(&t).await);
        assert_eq!(sup.start(&t).await.unwrap(), StartOutcome::AlreadyRunning);
        assert!(!sup.stop(&t).await.unwrap());
        assert_eq!(launcher.specs.lock().unwrap().len(), 1);

        assert!(stopping.await.unwrap().unwrap());
        assert!(!sup.is_running(&t).await);
        assert!(matches!(
            sup.start(&t).await.unwrap(),
            StartOutcome::Started { .. }
        ));
        assert_eq!(launcher.specs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stop_all_and_running_targets() {
        let (dir, _launcher, sup) = setup();
        for name in ["a.py", "b.py"] {
            fs::write(dir.path().join(name), "").unwrap();
            sup.start(&TargetId::parse(name).unwrap()).await.unwrap();
        }
        assert_eq!(sup.running_count().await, 2);
        assert_eq!(
            sup.running_targets().await,
            vec![TargetId::parse("a.py").unwrap(), TargetId::parse("b.py").unwrap()]
        );

        sup.stop_all().await;
        assert_eq!(sup.running_count().await, 0);
    }
}
