//! On-disk layout of hosted apps under the upload root.
//!
//! ```text
//! scripts/
//!   bot.py             uploaded script
//!   bot.py.env         its env overrides
//!   bot.py_req.txt     its requirements
//!   bot.py.log         its output
//!   myrepo/            cloned repository
//!     .env             env overrides for every entry of the repo
//!     myrepo_req.txt   attached requirements
//!   myrepo_src_main.py.log
//! ```

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    domain::{TargetId, TargetKind},
    errors::Error,
    Result,
};

/// Resolved paths of one hosted app.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetPaths {
    pub work_dir: PathBuf,
    /// Script path relative to `work_dir`.
    pub script: PathBuf,
    pub env_file: PathBuf,
    pub requirements: PathBuf,
    pub log_file: PathBuf,
}

impl TargetPaths {
    pub fn script_abs(&self) -> PathBuf {
        self.work_dir.join(&self.script)
    }
}

#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn repo_dir(&self, repo: &str) -> PathBuf {
        self.root.join(repo)
    }

    pub fn paths(&self, target: &TargetId) -> TargetPaths {
        let log_file = self.root.join(format!("{}.log", target.log_stem()));
        match target.repo_name() {
            Some(repo) => {
                let work_dir = self.repo_dir(repo);
                TargetPaths {
                    script: PathBuf::from(target.script()),
                    env_file: work_dir.join(".env"),
                    requirements: work_dir.join(format!("{}_req.txt", target.prefix())),
                    log_file,
                    work_dir,
                }
            }
            None => TargetPaths {
                work_dir: self.root.clone(),
                script: PathBuf::from(target.script()),
                env_file: self.root.join(format!("{}.env", target.as_str())),
                requirements: self.root.join(format!("{}_req.txt", target.prefix())),
                log_file,
            },
        }
    }

    /// Remove everything that belongs to `target`.
    ///
    /// For repo targets the repository directory is only removed when
    /// `repo_shared` is false (no other hosted entry points into it).
    pub fn remove_target_files(&self, target: &TargetId, repo_shared: bool) -> Result<()> {
        let paths = self.paths(target);
        remove_file_if_exists(&paths.log_file)?;

        match target.kind() {
            TargetKind::File => {
                remove_file_if_exists(&paths.script_abs())?;
                remove_file_if_exists(&paths.env_file)?;
                remove_file_if_exists(&paths.requirements)?;
            }
            TargetKind::Repo if !repo_shared => remove_dir_if_exists(&paths.work_dir)?,
            TargetKind::Repo => {
                debug!(target = %target, "repository still in use, keeping files");
            }
        }
        Ok(())
    }
}

/// Derive the local directory name for a git URL.
///
/// `https://github.com/user/my-bot.git` -> `my-bot`.
pub fn repo_name_from_url(url: &str) -> Result<String> {
    let url = url.trim();
    if !url.starts_with("http") {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('\\')
        || name.contains('|')
        || name.contains(':')
    {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    Ok(name.to_string())
}

/// All `.py` files below `repo_dir`, relative to it, sorted. `.git` is skipped.
pub fn discover_entries(repo_dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    walk_py(repo_dir, repo_dir, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk_py(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for ent in fs::read_dir(dir)? {
        let ent = ent?;
        let file_type = ent.file_type()?;
        let path = ent.path();
        if file_type.is_dir() {
            if ent.file_name() == ".git" {
                continue;
            }
            walk_py(base, &path, out)?;
        } else if file_type.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some("py")
        {
            if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
