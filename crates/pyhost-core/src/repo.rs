//! Cloning repositories into the workspace.

use std::path::PathBuf;

use tracing::info;

use crate::{
    access::AccessControl,
    dialog::Checkout,
    domain::UserId,
    errors::Error,
    ports::RepoFetcher,
    store::OwnershipStore,
    workspace::{discover_entries, remove_dir_if_exists, repo_name_from_url, Workspace},
    Result,
};

/// Entry buttons shown after a clone.
pub const MAX_ENTRY_CHOICES: usize = 12;

/// Fresh clone of `url` into the workspace, replacing any previous checkout.
pub async fn checkout(
    workspace: &Workspace,
    fetcher: &dyn RepoFetcher,
    url: &str,
) -> Result<Checkout> {
    let url = url.trim();
    let name = repo_name_from_url(url)?;
    let path = workspace.repo_dir(&name);

    let stale = path.clone();
    blocking(move || remove_dir_if_exists(&stale)).await?;
    fetcher.clone_repo(url, &path).await?;

    let root = path.clone();
    let entries = blocking(move || discover_entries(&root)).await?;
    info!(repo = %name, entries = entries.len(), "repository cloned");
    Ok(Checkout {
        name,
        path,
        entries,
    })
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::External(format!("filesystem task failed: {e}")))?
}

impl Checkout {
    /// `requirements.txt` at the repository root, if the repo ships one.
    pub fn root_requirements(&self) -> Option<PathBuf> {
        let p = self.path.join("requirements.txt");
        p.is_file().then_some(p)
    }

    /// Entries offered as buttons.
    pub fn choices(&self) -> &[String] {
        let n = self.entries.len().min(MAX_ENTRY_CHOICES);
        &self.entries[..n]
    }
}

/// Whether someone other than `user` already hosts apps from this repository.
///
/// Re-cloning replaces the directory, so non-admins may not clobber it.
pub fn repo_taken_by_other(
    ownership: &OwnershipStore,
    access: &AccessControl,
    repo: &str,
    user: UserId,
) -> bool {
    if access.is_admin(user) {
        return false;
    }
    ownership
        .targets_in_repo(repo)
        .iter()
        .any(|(_, meta)| meta.owner != user)
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path, sync::Arc};

    use async_trait::async_trait;

    use super::*;
    use crate::{domain::TargetId, store::AllowedUsers};

    /// Fetcher that "clones" by writing a fixed file tree.
    struct TreeFetcher {
        files: Vec<&'static str>,
    }

    #[async_trait]
    impl RepoFetcher for TreeFetcher {
        async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
            for f in &self.files {
                let p = dest.join(f);
                fs::create_dir_all(p.parent().unwrap())?;
                fs::write(p, "")?;
            }
            Ok(())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl RepoFetcher for FailingFetcher {
        async fn clone_repo(&self, _url: &str, _dest: &Path) -> Result<()> {
            Err(Error::External("repository not found".to_string()))
        }
    }

    #[tokio::test]
    async fn clone_replaces_previous_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        fs::create_dir_all(ws.repo_dir("bot")).unwrap();
        fs::write(ws.repo_dir("bot").join("stale.py"), "").unwrap();

        let fetcher = TreeFetcher {
            files: vec!["main.py", "lib/helpers.py", "requirements.txt"],
        };
        let co = checkout(&ws, &fetcher, "https://github.com/u/bot.git")
            .await
            .unwrap();

        assert_eq!(co.name, "bot");
        assert_eq!(co.entries, vec!["lib/helpers.py", "main.py"]);
        assert_eq!(co.root_requirements(), Some(ws.repo_dir("bot").join("requirements.txt")));
        assert!(!ws.repo_dir("bot").join("stale.py").exists());
    }

    #[tokio::test]
    async fn invalid_url_and_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        assert!(matches!(
            checkout(&ws, &FailingFetcher, "ftp://x/y").await,
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            checkout(&ws, &FailingFetcher, "https://github.com/u/y").await,
            Err(Error::External(_))
        ));
    }

    #[test]
    fn choices_are_capped() {
        let co = Checkout {
            name: "r".into(),
            path: PathBuf::from("/nowhere"),
            entries: (0..20).map(|i| format!("m{i:02}.py")).collect(),
        };
        assert_eq!(co.choices().len(), MAX_ENTRY_CHOICES);
        assert_eq!(co.root_requirements(), None);
    }

    #[test]
    fn repo_ownership_guard() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = OwnershipStore::new(dir.path().join("o.json"));
        let users = Arc::new(AllowedUsers::new(dir.path().join("u.json")));
        let access = AccessControl::new(Some(UserId(1)), users);
        ownership
            .set(&TargetId::parse("repo|main.py").unwrap(), UserId(2))
            .unwrap();

        assert!(!repo_taken_by_other(&ownership, &access, "repo", UserId(2)));
        assert!(repo_taken_by_other(&ownership, &access, "repo", UserId(3)));
        assert!(!repo_taken_by_other(&ownership, &access, "repo", UserId(1)));
        assert!(!repo_taken_by_other(&ownership, &access, "other", UserId(3)));
    }
}
