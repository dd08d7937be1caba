//! Per-user conversation state for the multi-step flows
//! (upload, clone, deploy link).

use std::{collections::HashMap, path::PathBuf};

use tokio::sync::Mutex;

use crate::domain::{TargetId, UserId};

pub const RUN_NOW: &str = "🚀 RUN NOW";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Waiting for a `.py` document.
    AwaitScript,
    /// Uploaded script: optional extras, then run.
    AwaitExtras,
    /// Waiting for a git URL to clone.
    AwaitRepoUrl,
    /// Waiting for the entry file button.
    AwaitEntry,
    /// Cloned repo: optional extras, then run.
    AwaitRepoExtras,
    /// Waiting for a repo URL to build a Render deploy link.
    AwaitDeployUrl,
}

impl Step {
    pub fn is_extras(self) -> bool {
        matches!(self, Step::AwaitExtras | Step::AwaitRepoExtras)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingUpload {
    Requirements,
    Env,
}

impl PendingUpload {
    /// Extension the next document must carry to be accepted.
    pub fn accepts(self, file_name: &str) -> bool {
        match self {
            PendingUpload::Requirements => file_name.ends_with(".txt"),
            PendingUpload::Env => file_name.ends_with(".env"),
        }
    }
}

/// A freshly cloned repository waiting for its entry to be picked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkout {
    pub name: String,
    pub path: PathBuf,
    pub entries: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dialog {
    pub step: Step,
    pub target: Option<TargetId>,
    pub pending: Option<PendingUpload>,
    pub checkout: Option<Checkout>,
}

impl Dialog {
    pub fn at(step: Step) -> Self {
        Self {
            step,
            target: None,
            pending: None,
            checkout: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtrasChoice {
    Run,
    Requirements,
    Env,
    Unknown,
}

pub fn extras_choice(text: &str) -> ExtrasChoice {
    if text == RUN_NOW {
        ExtrasChoice::Run
    } else if text.contains("reqs") {
        ExtrasChoice::Requirements
    } else if text.contains(".env") {
        ExtrasChoice::Env
    } else {
        ExtrasChoice::Unknown
    }
}

/// Active dialogs keyed by user.
#[derive(Default)]
pub struct Dialogs {
    inner: Mutex<HashMap<UserId, Dialog>>,
}

impl Dialogs {
    pub async fn get(&self, user: UserId) -> Option<Dialog> {
        self.inner.lock().await.get(&user).cloned()
    }

    pub async fn begin(&self, user: UserId, step: Step) {
        self.inner.lock().await.insert(user, Dialog::at(step));
    }

    pub async fn set(&self, user: UserId, dialog: Dialog) {
        self.inner.lock().await.insert(user, dialog);
    }

    /// Apply `f` to the user's dialog if one is active.
    pub async fn update(&self, user: UserId, f: impl FnOnce(&mut Dialog)) -> Option<Dialog> {
        let mut map = self.inner.lock().await;
        let dialog = map.get_mut(&user)?;
        f(dialog);
        Some(dialog.clone())
    }

    pub async fn end(&self, user: UserId) -> Option<Dialog> {
        self.inner.lock().await.remove(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extras_choices() {
        assert_eq!(extras_choice("🚀 RUN NOW"), ExtrasChoice::Run);
        assert_eq!(extras_choice("➕ Add reqs"), ExtrasChoice::Requirements);
        assert_eq!(extras_choice("➕ Add .env"), ExtrasChoice::Env);
        assert_eq!(extras_choice("hello"), ExtrasChoice::Unknown);
    }

    #[test]
    fn pending_upload_extensions() {
        assert!(PendingUpload::Requirements.accepts("requirements.txt"));
        assert!(!PendingUpload::Requirements.accepts("requirements.in"));
        assert!(PendingUpload::Env.accepts("prod.env"));
        assert!(PendingUpload::Env.accepts(".env"));
        assert!(!PendingUpload::Env.accepts("env.txt"));
    }

    #[tokio::test]
    async fn dialog_lifecycle() {
        let dialogs = Dialogs::default();
        let user = UserId(9);
        assert!(dialogs.get(user).await.is_none());
        assert!(dialogs.update(user, |d| d.step = Step::AwaitExtras).await.is_none());

        dialogs.begin(user, Step::AwaitScript).await;
        let updated = dialogs
            .update(user, |d| {
                d.step = Step::AwaitExtras;
                d.target = TargetId::parse("bot.py").ok();
                d.pending = Some(PendingUpload::Env);
            })
            .await
            .unwrap();
        assert!(updated.step.is_extras());
        assert_eq!(dialogs.get(user).await, Some(updated));

        assert!(dialogs.end(user).await.is_some());
        assert!(dialogs.get(user).await.is_none());
    }
}
