//! User-facing view of hosted apps: who sees what, status links, deletion.

use std::sync::Arc;

use tracing::info;

use crate::{
    access::AccessControl,
    domain::{TargetId, UserId},
    store::OwnershipStore,
    supervisor::Supervisor,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppEntry {
    pub target: TargetId,
    pub owner: UserId,
    pub running: bool,
}

impl AppEntry {
    /// Button label: status dot, id, and the owner when the viewer is not the owner.
    pub fn label(&self, viewer: UserId) -> String {
        let status = if self.running { "🟢" } else { "🔴" };
        let mut label = format!("{status} {}", self.target);
        if viewer != self.owner {
            label.push_str(&format!(" (User: {})", self.owner));
        }
        label
    }
}

pub struct Catalog {
    ownership: Arc<OwnershipStore>,
    access: AccessControl,
    supervisor: Arc<Supervisor>,
}

impl Catalog {
    pub fn new(
        ownership: Arc<OwnershipStore>,
        access: AccessControl,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        Self {
            ownership,
            access,
            supervisor,
        }
    }

    /// Apps visible to `viewer`: their own, or all of them for the admin.
    pub async fn list_for(&self, viewer: UserId) -> Vec<AppEntry> {
        let mut out = Vec::new();
        for (target, meta) in self.ownership.load_all() {
            if !self.access.can_manage(viewer, Some(meta.owner)) {
                continue;
            }
            let running = self.supervisor.is_running(&target).await;
            out.push(AppEntry {
                target,
                owner: meta.owner,
                running,
            });
        }
        out
    }

    /// Remove a hosted app: stop it, delete its files and forget its owner.
    pub async fn delete(&self, target: &TargetId) -> Result<()> {
        self.supervisor.forget(target).await?;

        let repo_shared = match target.repo_name() {
            Some(repo) => self
                .ownership
                .targets_in_repo(repo)
                .iter()
                .any(|(other, _)| other != target),
            None => false,
        };
        self.supervisor
            .workspace()
            .remove_target_files(target, repo_shared)?;
        self.ownership.remove(target)?;

        info!(target = %target, repo_shared, "hosted app deleted");
        Ok(())
    }
}

/// Public status URL for uptime monitors.
pub fn status_url(base_url: &str, target: &TargetId) -> String {
    let script: String = url::form_urlencoded::byte_serialize(target.as_str().as_bytes()).collect();
    format!("{}/status?script={script}", base_url.trim_end_matches('/'))
}
