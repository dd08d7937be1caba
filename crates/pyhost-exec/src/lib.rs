//! Subprocess adapters: hosted Python scripts, `pip` and `git`.
//!
//! Hosted scripts run as leaders of their own process group so that stopping
//! one also stops whatever it spawned.

use std::{
    collections::VecDeque,
    fs::File,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use pyhost_core::{
    errors::Error,
    ports::{
        ExitInfo, InstallOutcome, LaunchSpec, PackageInstaller, ProcessHandle, RepoFetcher,
        ScriptLauncher,
    },
    Result,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    sync::Mutex,
};
use tracing::{debug, info, warn};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Run a short-lived tool to completion, keeping the tail of its stderr.
async fn run_capturing_stderr(mut cmd: Command, tool: &str) -> Result<(ExitStatus, String)> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::External(format!("failed to spawn {tool}: {e}")))?;

    let tail = Arc::new(Mutex::new(StderrTail::default()));
    let drain = child.stderr.take().map(|stderr| {
        let tail = tail.clone();
        tokio::spawn(async move {
            let mut r = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = r.next_line().await {
                tail.lock().await.push_line(line);
            }
        })
    });

    let status = child.wait().await?;
    if let Some(drain) = drain {
        let _ = drain.await;
    }
    let stderr = tail.lock().await.snapshot();
    Ok((status, stderr))
}

/// Launches hosted scripts with output redirected into their log file.
#[derive(Clone, Debug, Default)]
pub struct PythonLauncher;

impl PythonLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScriptLauncher for PythonLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let log = File::create(&spec.log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env_overrides)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            Error::External(format!(
                "failed to launch {}: {e}",
                spec.program.display()
            ))
        })?;
        let pid = child.id();
        debug!(pid = ?pid, cwd = %spec.cwd.display(), args = ?spec.args, "spawned hosted process");
        Ok(Box::new(ChildHandle { child, pid }))
    }
}

/// A hosted process and its process group.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    // Captured at spawn; `Child::id` is gone once the child is reaped.
    pid: Option<u32>,
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Group already gone.
        return Ok(());
    }
    Err(err)
}

impl ChildHandle {
    #[cfg(unix)]
    async fn stop_group(&mut self, timeout: Duration) -> Result<ExitInfo> {
        let Some(pid) = self.pid else {
            return Ok(exit_info(self.child.wait().await?));
        };

        signal_group(pid, libc::SIGTERM)?;
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(exit_info(status?)),
            Err(_) => {
                warn!(pid, timeout_ms = timeout.as_millis() as u64, "process group ignored SIGTERM, killing");
                signal_group(pid, libc::SIGKILL)?;
                Ok(exit_info(self.child.wait().await?))
            }
        }
    }

    #[cfg(not(unix))]
    async fn stop_group(&mut self, _timeout: Duration) -> Result<ExitInfo> {
        self.child.start_kill()?;
        Ok(exit_info(self.child.wait().await?))
    }
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(exit_info))
    }

    async fn terminate(&mut self, timeout: Duration) -> Result<ExitInfo> {
        if let Some(status) = self.child.try_wait()? {
            // Leader is gone; children it left behind still share the group.
            #[cfg(unix)]
            if let Some(pid) = self.pid {
                signal_group(pid, libc::SIGTERM)?;
            }
            return Ok(exit_info(status));
        }
        self.stop_group(timeout).await
    }
}

/// `pip install -r <file>`.
#[derive(Clone, Debug)]
pub struct PipInstaller {
    pip: PathBuf,
}

impl PipInstaller {
    pub fn new(pip: impl Into<PathBuf>) -> Self {
        Self { pip: pip.into() }
    }
}

#[async_trait]
impl PackageInstaller for PipInstaller {
    async fn install(&self, requirements: &Path) -> Result<InstallOutcome> {
        let mut cmd = Command::new(&self.pip);
        cmd.arg("install").arg("-r").arg(requirements);
        if let Some(dir) = requirements.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        info!(requirements = %requirements.display(), "running pip install");
        let (status, stderr) = run_capturing_stderr(cmd, "pip").await?;
        Ok(InstallOutcome {
            success: status.success(),
            stderr_tail: stderr,
        })
    }
}

/// `git clone <url> <dest>`.
#[derive(Clone, Debug)]
pub struct GitFetcher {
    git: PathBuf,
}

impl GitFetcher {
    pub fn new(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }
}

#[async_trait]
impl RepoFetcher for GitFetcher {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.git);
        cmd.arg("clone")
            .arg(url)
            .arg(dest)
            // Private repos must fail instead of waiting for credentials.
            .env("GIT_TERMINAL_PROMPT", "0");

        info!(url, dest = %dest.display(), "cloning repository");
        let (status, stderr) = run_capturing_stderr(cmd, "git").await?;
        if status.success() {
            return Ok(());
        }

        let mut msg = format!("git clone exited with {status}");
        if !stderr.trim().is_empty() {
            msg.push('\n');
            msg.push_str(stderr.trim());
        }
        Err(Error::External(msg))
    }
}
