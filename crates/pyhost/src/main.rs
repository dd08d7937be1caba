use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pyhost_core::{config::Config, supervisor::Supervisor, workspace::Workspace};
use pyhost_exec::{GitFetcher, PipInstaller, PythonLauncher};
use pyhost_telegram::router::{run_polling, AppState};

#[tokio::main]
async fn main() -> Result<(), pyhost_core::Error> {
    pyhost_core::logging::init("pyhost")?;

    let cfg = Arc::new(Config::load()?);

    let workspace = Workspace::new(cfg.upload_dir.clone());
    workspace.ensure_root()?;

    let supervisor = Arc::new(Supervisor::new(
        workspace,
        Arc::new(PythonLauncher::new()),
        cfg.python_bin.clone(),
        cfg.stop_timeout,
    ));

    let shutdown = CancellationToken::new();
    let http = {
        let (addr, supervisor, shutdown) = (cfg.http_bind, supervisor.clone(), shutdown.clone());
        tokio::spawn(async move {
            if let Err(e) = pyhost_http::serve(addr, supervisor, shutdown).await {
                error!(error = %e, "status server failed");
            }
        })
    };

    let state = Arc::new(AppState::new(
        cfg.clone(),
        supervisor.clone(),
        Arc::new(PipInstaller::new(cfg.pip_bin.clone())),
        Arc::new(GitFetcher::new(cfg.git_bin.clone())),
    ));

    let polled = run_polling(state).await;

    info!("shutting down");
    shutdown.cancel();
    if let Err(e) = http.await {
        error!(error = %e, "status server task panicked");
    }
    supervisor.stop_all().await;

    polled.map_err(|e| pyhost_core::Error::External(format!("telegram bot failed: {e}")))
}
