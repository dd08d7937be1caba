//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - checks access
//! - advances the user's dialog
//! - calls into `pyhost-core` and renders the outcome

use std::{path::Path, sync::Arc};

use teloxide::{
    net::Download,
    prelude::*,
    types::{CallbackQuery, Message, ParseMode, User},
};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use pyhost_core::{
    audit::AuditEvent,
    dialog::Step,
    domain::UserId,
    formatting::{escape_html, escaped_tail},
    requirements,
};

use crate::{router::AppState, send_html, MenuAction};

mod callback;
mod commands;
mod deploy;
mod execute;
mod git;
mod manage;
mod stats;
mod upload;

pub(crate) const ACCESS_DENIED: &str = "⛔ Access Denied.";

/// Budget for escaped log/stderr excerpts so messages stay under Telegram's limit.
pub(crate) const EXCERPT_BUDGET: usize = 3_500;

pub(crate) fn user_id(user: &User) -> UserId {
    UserId(user.id.0 as i64)
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from().cloned() else {
        return Ok(());
    };
    let uid = user_id(&user);

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
        if let Some(action) = MenuAction::parse(text) {
            return handle_menu(&bot, &msg, &state, &user, action).await;
        }
    }

    // Anything else only means something inside a flow.
    let Some(dialog) = state.dialogs.get(uid).await else {
        return Ok(());
    };
    if !state.access.is_allowed(uid) {
        state.dialogs.end(uid).await;
        deny(&bot, msg.chat.id, &state, &user, "dialog").await;
        return Ok(());
    }

    match (dialog.step, msg.text(), msg.document()) {
        (Step::AwaitScript, _, Some(doc)) => {
            upload::receive_script(&bot, &msg, &state, &user, doc).await
        }
        (step, Some(text), _) if step.is_extras() => {
            upload::receive_extras_choice(&bot, &msg, &state, &user, &dialog, text).await
        }
        (step, _, Some(doc)) if step.is_extras() => {
            upload::receive_extra_file(&bot, &msg, &state, &user, &dialog, doc).await
        }
        (Step::AwaitRepoUrl, Some(text), _) => {
            git::receive_url(&bot, &msg, &state, &user, text).await
        }
        (Step::AwaitDeployUrl, Some(text), _) => {
            deploy::receive_url(&bot, &msg, &state, &user, text).await
        }
        _ => Ok(()),
    }
}

async fn handle_menu(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    user: &User,
    action: MenuAction,
) -> ResponseResult<()> {
    let uid = user_id(user);
    let chat_id = msg.chat.id;

    // Every menu entry starts over.
    state.dialogs.end(uid).await;

    if action == MenuAction::Cancel {
        return commands::cancel(bot, chat_id).await;
    }
    if !state.access.is_allowed(uid) {
        deny(bot, chat_id, state, user, "menu").await;
        return Ok(());
    }

    match action {
        MenuAction::Upload => upload::begin(bot, chat_id, state, uid).await,
        MenuAction::Clone => git::begin(bot, chat_id, state, uid).await,
        MenuAction::Deploy => deploy::begin(bot, chat_id, state, uid).await,
        MenuAction::Apps => manage::list_apps(bot, chat_id, state, uid).await,
        MenuAction::Stats => stats::show(bot, chat_id, state).await,
        MenuAction::Help => commands::send_help(bot, chat_id, state, uid).await,
        MenuAction::Cancel => Ok(()),
    }
}

pub(crate) async fn deny(bot: &Bot, chat_id: ChatId, state: &AppState, user: &User, what: &str) {
    state.audit.record(AuditEvent::denied(
        user_id(user),
        user.username.as_deref(),
        what,
    ));
    send_html(bot, chat_id, ACCESS_DENIED).await;
}

pub(crate) fn audit_action(
    state: &AppState,
    user: &User,
    action: &str,
    target: Option<&pyhost_core::domain::TargetId>,
    detail: Option<&str>,
) {
    state.audit.record(AuditEvent::action(
        user_id(user),
        user.username.as_deref(),
        action,
        target,
        detail,
    ));
}

pub(crate) fn audit_error(state: &AppState, user: &User, context: &str, error: &str) {
    state.audit.record(AuditEvent::error(
        user_id(user),
        user.username.as_deref(),
        context,
        error,
    ));
}

/// Download a Telegram file to `dest`, replacing it.
pub(crate) async fn download_to(bot: &Bot, file_id: &str, dest: &Path) -> anyhow::Result<()> {
    let file = bot.get_file(file_id.to_string()).await?;
    let mut dst = tokio::fs::File::create(dest).await?;
    bot.download_file(&file.path, &mut dst).await?;
    dst.flush().await?;
    Ok(())
}

/// Edit a progress message in place, falling back to a new message.
pub(crate) async fn edit_or_send(bot: &Bot, chat_id: ChatId, progress: Option<Message>, html: String) {
    if let Some(m) = progress {
        match bot
            .edit_message_text(chat_id, m.id, html.clone())
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => return,
            Err(e) => warn!(chat_id = chat_id.0, error = %e, "failed to edit progress message"),
        }
    }
    send_html(bot, chat_id, html).await;
}

/// Normalize and install a requirements file, reporting progress in chat.
pub(crate) async fn install_requirements(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    user: &User,
    path: &Path,
) {
    let progress = send_html(bot, chat_id, "⏳ Installing requirements...").await;
    let text = match requirements::install(state.installer.as_ref(), path).await {
        Ok(outcome) if outcome.success => {
            audit_action(state, user, "install", None, Some(&path.display().to_string()));
            "✅ Installed!".to_string()
        }
        Ok(outcome) => {
            audit_error(state, user, "install", &outcome.stderr_tail);
            format!(
                "❌ Failed:\n<pre>{}</pre>",
                escaped_tail(&outcome.stderr_tail, EXCERPT_BUDGET)
            )
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "pip could not be run");
            audit_error(state, user, "install", &e.to_string());
            format!("❌ Error: {}", escape_html(&e.to_string()))
        }
    };
    edit_or_send(bot, chat_id, progress, text).await;
}
