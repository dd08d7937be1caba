use teloxide::{prelude::*, types::User};
use tracing::warn;

use pyhost_core::{
    catalog::status_url,
    domain::TargetId,
    formatting::{escape_html, escaped_tail},
    supervisor::{Settled, StartOutcome},
};

use crate::{main_menu_keyboard, router::AppState, send_html, send_html_with};

use super::{audit_action, audit_error, user_id, EXCERPT_BUDGET};

/// Start a hosted app and report whether it survives the startup grace period.
///
/// Always ends the user's dialog.
pub(crate) async fn execute(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    user: &User,
    target: &TargetId,
) -> ResponseResult<()> {
    state.dialogs.end(user_id(user)).await;
    let id = escape_html(target.as_str());

    let pid = match state.supervisor.start(target).await {
        Ok(StartOutcome::AlreadyRunning) => {
            send_html_with(
                bot,
                chat_id,
                format!("⚠️ <code>{id}</code> is already running!"),
                main_menu_keyboard(),
            )
            .await;
            return Ok(());
        }
        Ok(StartOutcome::Started { pid }) => pid,
        Err(e) => {
            warn!(target = %target, error = %e, "failed to start hosted app");
            audit_error(state, user, "run", &e.to_string());
            send_html_with(
                bot,
                chat_id,
                format!("❌ Error: {}", escape_html(&e.to_string())),
                main_menu_keyboard(),
            )
            .await;
            return Ok(());
        }
    };

    audit_action(state, user, "run", Some(target), None);
    let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());
    send_html(
        bot,
        chat_id,
        format!("🚀 Started!\nID: <code>{id}</code>\nPID: {pid}"),
    )
    .await;

    let report = match state.supervisor.settle(target, state.cfg.startup_grace).await {
        Settled::Running => format!(
            "🟢 Running!\n🔗 <code>{}</code>",
            escape_html(&status_url(&state.cfg.public_base_url, target))
        ),
        Settled::Crashed { code, log_tail } => {
            let code = code
                .map(|c| format!("\nExit code: {c}"))
                .unwrap_or_default();
            let tail = if log_tail.trim().is_empty() {
                "(no output)".to_string()
            } else {
                escaped_tail(&log_tail, EXCERPT_BUDGET)
            };
            format!("❌ Crashed:\n<pre>{tail}</pre>{code}")
        }
    };
    send_html_with(bot, chat_id, report, main_menu_keyboard()).await;
    Ok(())
}
