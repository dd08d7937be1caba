use std::{fmt, path::Component, path::Path};

use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a hosted app got onto the box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    File,
    Repo,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::File => "file",
            TargetKind::Repo => "repo",
        }
    }
}

const REPO_SEPARATOR: char = '|';

/// Identity of a hosted app.
///
/// Uploaded scripts are identified by their file name (`bot.py`); scripts
/// inside a cloned repository by `<repo>|<entry>` (`myrepo|src/main.py`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(String);

impl TargetId {
    pub fn file(name: &str) -> Result<Self> {
        validate_plain_name(name, name)?;
        Ok(Self(name.to_string()))
    }

    pub fn repo(repo: &str, entry: &str) -> Result<Self> {
        let id = format!("{repo}{REPO_SEPARATOR}{entry}");
        validate_plain_name(&id, repo)?;
        validate_entry(&id, entry)?;
        Ok(Self(id))
    }

    /// Parse an id coming back from storage or a callback button.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(REPO_SEPARATOR) {
            Some((repo, entry)) => Self::repo(repo, entry),
            None => Self::file(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> TargetKind {
        if self.0.contains(REPO_SEPARATOR) {
            TargetKind::Repo
        } else {
            TargetKind::File
        }
    }

    /// Repository name for repo targets.
    pub fn repo_name(&self) -> Option<&str> {
        self.0.split_once(REPO_SEPARATOR).map(|(repo, _)| repo)
    }

    /// Script path relative to the target's work dir.
    pub fn script(&self) -> &str {
        match self.0.split_once(REPO_SEPARATOR) {
            Some((_, entry)) => entry,
            None => &self.0,
        }
    }

    /// Prefix used to name attached requirement files.
    pub fn prefix(&self) -> &str {
        self.repo_name().unwrap_or(&self.0)
    }

    /// File-system safe stem used for the log file.
    pub fn log_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| match c {
                REPO_SEPARATOR | '/' | '\\' => '_',
                other => other,
            })
            .collect()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn invalid(id: &str, reason: &str) -> Error {
    Error::InvalidTarget {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_plain_name(id: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(invalid(id, "empty name"));
    }
    if name == "." || name == ".." {
        return Err(invalid(id, "reserved name"));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(invalid(id, "name must not contain path separators"));
    }
    if name.contains(REPO_SEPARATOR) {
        return Err(invalid(id, "name must not contain '|'"));
    }
    Ok(())
}

fn validate_entry(id: &str, entry: &str) -> Result<()> {
    if entry.trim().is_empty() {
        return Err(invalid(id, "empty entry path"));
    }
    if entry.contains('\0') {
        return Err(invalid(id, "entry path contains NUL"));
    }
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(invalid(id, "entry path must be relative"));
    }
    for c in path.components() {
        match c {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(invalid(id, "entry path must stay inside the repository")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_repo_ids() {
        let f = TargetId::parse("bot.py").unwrap();
        assert_eq!(f.kind(), TargetKind::File);
        assert_eq!(f.script(), "bot.py");
        assert_eq!(f.prefix(), "bot.py");
        assert_eq!(f.repo_name(), None);

        let r = TargetId::parse("myrepo|src/main.py").unwrap();
        assert_eq!(r.kind(), TargetKind::Repo);
        assert_eq!(r.repo_name(), Some("myrepo"));
        assert_eq!(r.script(), "src/main.py");
        assert_eq!(r.prefix(), "myrepo");
        assert_eq!(r.log_stem(), "myrepo_src_main.py");
    }

    #[test]
    fn repo_split_uses_first_separator() {
        let r = TargetId::parse("repo|weird|name.py").unwrap();
        assert_eq!(r.repo_name(), Some("repo"));
        assert_eq!(r.script(), "weird|name.py");
    }

    #[test]
    fn rejects_traversal() {
        assert!(TargetId::parse("../evil.py").is_err());
        assert!(TargetId::parse("..").is_err());
        assert!(TargetId::parse("").is_err());
        assert!(TargetId::parse("repo|../../etc/passwd").is_err());
        assert!(TargetId::parse("repo|/abs.py").is_err());
        assert!(TargetId::parse("a/b|main.py").is_err());
    }

    #[test]
    fn file_names_cannot_pose_as_repo_targets() {
        let err = TargetId::file("victim|evil.py").unwrap_err();
        assert!(matches!(err, Error::InvalidTarget { .. }));
        assert!(TargetId::file("a|b.py").is_err());
        assert!(TargetId::repo("a|b", "main.py").is_err());
        assert_eq!(TargetId::file("plain.py").unwrap().kind(), TargetKind::File);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TargetKind::Repo).unwrap(), "\"repo\"");
        let k: TargetKind = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(k, TargetKind::File);
    }
}
