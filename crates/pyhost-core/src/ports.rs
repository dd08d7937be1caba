//! Hexagonal ports for everything that touches external processes.
//!
//! `pyhost-exec` implements these with real subprocesses; tests use fakes.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;

use crate::Result;

/// Everything needed to spawn one hosted script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Applied on top of the bot's own environment.
    pub env_overrides: BTreeMap<String, String>,
    /// Truncated on launch; receives both stdout and stderr.
    pub log_path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

/// A launched hosted process (leader of its own process group).
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check; reaps the child if it has exited.
    fn try_wait(&mut self) -> Result<Option<ExitInfo>>;

    /// Stop the whole process group: graceful signal first, forced after `timeout`.
    async fn terminate(&mut self, timeout: Duration) -> Result<ExitInfo>;
}

#[async_trait]
pub trait ScriptLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    pub success: bool,
    pub stderr_tail: String,
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, requirements: &Path) -> Result<InstallOutcome>;
}

#[async_trait]
pub trait RepoFetcher: Send + Sync {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
}
