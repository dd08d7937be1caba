//! JSON-file persistence for the allow-list and app ownership.
//!
//! File formats stay compatible with earlier deployments:
//! `allowed_users.json` is `[123, 456]` and `ownership.json` is
//! `{"bot.py": {"owner": 123, "type": "file"}}`.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::{
    domain::{TargetId, TargetKind, UserId},
    Result,
};

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(txt) = fs::read_to_string(path) else {
        return T::default();
    };
    if txt.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(&txt) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable store file");
            T::default()
        }
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let txt = serde_json::to_string(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, txt)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Users allowed to host apps (besides the super admin).
#[derive(Debug)]
pub struct AllowedUsers {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AllowedUsers {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn list(&self) -> Vec<UserId> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        read_json_or_default::<Vec<i64>>(&self.path)
            .into_iter()
            .map(UserId)
            .collect()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.list().contains(&user)
    }

    /// Returns `false` if the user was already allowed.
    pub fn add(&self, user: UserId) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut users: Vec<i64> = read_json_or_default(&self.path);
        if users.contains(&user.0) {
            return Ok(false);
        }
        users.push(user.0);
        write_json_atomic(&self.path, &users)?;
        Ok(true)
    }

    /// Returns `false` if the user was not in the list.
    pub fn remove(&self, user: UserId) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut users: Vec<i64> = read_json_or_default(&self.path);
        let before = users.len();
        users.retain(|u| *u != user.0);
        if users.len() == before {
            return Ok(false);
        }
        write_json_atomic(&self.path, &users)?;
        Ok(true)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub owner: UserId,
    #[serde(rename = "type")]
    pub kind: TargetKind,
}

/// Who owns which hosted app.
#[derive(Debug)]
pub struct OwnershipStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OwnershipStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// All valid entries, ordered by id. Entries whose id no longer parses are skipped.
    pub fn load_all(&self) -> Vec<(TargetId, Ownership)> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read()
            .into_iter()
            .filter_map(|(id, meta)| match TargetId::parse(&id) {
                Ok(t) => Some((t, meta)),
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping invalid ownership entry");
                    None
                }
            })
            .collect()
    }

    pub fn get(&self, target: &TargetId) -> Option<Ownership> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read().get(target.as_str()).copied()
    }

    pub fn owner_of(&self, target: &TargetId) -> Option<UserId> {
        self.get(target).map(|o| o.owner)
    }

    pub fn set(&self, target: &TargetId, owner: UserId) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut data = self.read();
        data.insert(
            target.as_str().to_string(),
            Ownership {
                owner,
                kind: target.kind(),
            },
        );
        write_json_atomic(&self.path, &data)
    }

    /// Returns `false` when there was nothing to remove.
    pub fn remove(&self, target: &TargetId) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut data = self.read();
        if data.remove(target.as_str()).is_none() {
            return Ok(false);
        }
        write_json_atomic(&self.path, &data)?;
        Ok(true)
    }

    /// Hosted targets that live inside the given cloned repository.
    pub fn targets_in_repo(&self, repo: &str) -> Vec<(TargetId, Ownership)> {
        self.load_all()
            .into_iter()
            .filter(|(t, _)| t.repo_name() == Some(repo))
            .collect()
    }

    fn read(&self) -> BTreeMap<String, Ownership> {
        read_json_or_default(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_users_add_remove() {
        let dir = tempfile::tempdir().unwrap();
        let users = AllowedUsers::new(dir.path().join("allowed_users.json"));

        assert!(users.list().is_empty());
        assert!(users.add(UserId(5)).unwrap());
        assert!(!users.add(UserId(5)).unwrap());
        assert!(users.add(UserId(7)).unwrap());
        assert_eq!(users.list(), vec![UserId(5), UserId(7)]);
        assert!(users.contains(UserId(7)));

        assert!(users.remove(UserId(5)).unwrap());
        assert!(!users.remove(UserId(5)).unwrap());
        assert_eq!(users.list(), vec![UserId(7)]);

        let raw = fs::read_to_string(dir.path().join("allowed_users.json")).unwrap();
        assert_eq!(raw, "[7]");
    }

    #[test]
    fn corrupt_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let users_path = dir.path().join("u.json");
        let own_path = dir.path().join("o.json");
        fs::write(&users_path, "{not json").unwrap();
        fs::write(&own_path, "[1,2]").unwrap();

        assert!(AllowedUsers::new(&users_path).list().is_empty());
        assert!(OwnershipStore::new(&own_path).load_all().is_empty());
    }

    #[test]
    fn ownership_reads_and_writes_owner_type_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ownership.json");
        fs::write(
            &path,
            r#"{"bot.py":{"owner":11,"type":"file"},"repo|main.py":{"owner":12,"type":"repo"}}"#,
        )
        .unwrap();
        let store = OwnershipStore::new(&path);

        let bot = TargetId::parse("bot.py").unwrap();
        assert_eq!(store.owner_of(&bot), Some(UserId(11)));
        assert_eq!(store.load_all().len(), 2);

        let other = TargetId::repo("repo", "other.py").unwrap();
        store.set(&other, UserId(13)).unwrap();
        assert_eq!(
            store.get(&other),
            Some(Ownership {
                owner: UserId(13),
                kind: TargetKind::Repo
            })
        );
        assert_eq!(store.targets_in_repo("repo").len(), 2);

        assert!(store.remove(&bot).unwrap());
        assert!(!store.remove(&bot).unwrap());
        assert_eq!(store.owner_of(&bot), None);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["repo|other.py"]["type"], "repo");
        assert_eq!(raw["repo|other.py"]["owner"], 13);
    }

    #[test]
    fn invalid_ids_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ownership.json");
        fs::write(
            &path,
            r#"{"../x.py":{"owner":1,"type":"file"},"ok.py":{"owner":1,"type":"file"}}"#,
        )
        .unwrap();
        let all = OwnershipStore::new(&path).load_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0.as_str(), "ok.py");
    }
}
