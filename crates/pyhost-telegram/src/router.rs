use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use pyhost_core::{
    access::AccessControl,
    audit::AuditLogger,
    catalog::Catalog,
    config::Config,
    dialog::Dialogs,
    ports::{PackageInstaller, RepoFetcher},
    store::{AllowedUsers, OwnershipStore},
    supervisor::Supervisor,
    workspace::Workspace,
};

use crate::handlers;

/// Everything handlers need, injected into the dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub access: AccessControl,
    pub ownership: Arc<OwnershipStore>,
    pub supervisor: Arc<Supervisor>,
    pub catalog: Arc<Catalog>,
    pub installer: Arc<dyn PackageInstaller>,
    pub fetcher: Arc<dyn RepoFetcher>,
    pub dialogs: Arc<Dialogs>,
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        supervisor: Arc<Supervisor>,
        installer: Arc<dyn PackageInstaller>,
        fetcher: Arc<dyn RepoFetcher>,
    ) -> Self {
        let users = Arc::new(AllowedUsers::new(cfg.users_file.clone()));
        let access = AccessControl::new(cfg.admin_id, users);
        let ownership = Arc::new(OwnershipStore::new(cfg.ownership_file.clone()));
        let catalog = Arc::new(Catalog::new(
            ownership.clone(),
            access.clone(),
            supervisor.clone(),
        ));
        let audit = Arc::new(AuditLogger::new(
            cfg.audit_log_path.clone(),
            cfg.audit_log_json,
        ));

        Self {
            cfg,
            access,
            ownership,
            supervisor,
            catalog,
            installer,
            fetcher,
            dialogs: Arc::new(Dialogs::default()),
            audit,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        self.supervisor.workspace()
    }
}

/// Long-poll Telegram until Ctrl-C.
pub async fn run_polling(state: Arc<AppState>) -> anyhow::Result<()> {
    let bot = Bot::new(state.cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }
    info!(
        upload_dir = %state.cfg.upload_dir.display(),
        admin = ?state.cfg.admin_id.map(|a| a.0),
        allowed_users = state.access.users().list().len(),
        "hosting ready"
    );
    if state.cfg.admin_id.is_none() {
        warn!("ADMIN_ID is not set; only allow-listed users can use the bot and nobody can manage the list");
    }

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
