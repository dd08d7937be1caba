use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode, User},
};
use tracing::warn;

use pyhost_core::{
    audit::AuditEvent,
    callback::{app, AppAction, TargetKey},
    catalog::status_url,
    domain::{TargetId, UserId},
    formatting::{escape_html, format_duration},
};

use crate::{main_menu_keyboard, router::AppState, send_html, send_html_with};

use super::{audit_action, audit_error, execute, user_id};

pub(super) async fn list_apps(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    viewer: UserId,
) -> ResponseResult<()> {
    let apps = state.catalog.list_for(viewer).await;
    if apps.is_empty() {
        send_html_with(bot, chat_id, "📂 No hosted apps.", main_menu_keyboard()).await;
        return Ok(());
    }

    let rows: Vec<Vec<InlineKeyboardButton>> = apps
        .iter()
        .map(|a| {
            vec![InlineKeyboardButton::callback(
                a.label(viewer),
                app(AppAction::Manage, &a.target),
            )]
        })
        .collect();
    send_html_with(bot, chat_id, "📂 Your Apps:", InlineKeyboardMarkup::new(rows)).await;
    Ok(())
}

fn manage_keyboard(target: &TargetId, running: bool) -> InlineKeyboardMarkup {
    let button = |label: &str, action: AppAction| {
        vec![InlineKeyboardButton::callback(label.to_string(), app(action, target))]
    };
    let mut rows = Vec::new();
    if running {
        rows.push(button("🛑 Stop", AppAction::Stop));
        rows.push(button("🔗 URL", AppAction::Url));
    } else {
        rows.push(button("🚀 Run", AppAction::Rerun));
    }
    rows.push(button("📜 Logs", AppAction::Logs));
    rows.push(button("🗑️ Delete", AppAction::Delete));
    InlineKeyboardMarkup::new(rows)
}

pub(super) async fn handle_action(
    bot: &Bot,
    message: &Message,
    state: &AppState,
    user: &User,
    action: AppAction,
    key: TargetKey,
) -> ResponseResult<()> {
    let uid = user_id(user);
    let chat_id = message.chat.id;

    let known: Vec<TargetId> = state
        .ownership
        .load_all()
        .into_iter()
        .map(|(t, _)| t)
        .collect();
    let Some(target) = key.resolve(&known) else {
        send_html(bot, chat_id, "❌ App not found.").await;
        return Ok(());
    };

    let owner = state.ownership.owner_of(&target);
    if !state.access.can_manage(uid, owner) {
        state.audit.record(AuditEvent::denied(
            uid,
            user.username.as_deref(),
            &format!("manage {target}"),
        ));
        send_html(bot, chat_id, "⛔ Not yours.").await;
        return Ok(());
    }
    let id = escape_html(target.as_str());

    match action {
        AppAction::Manage => {
            let uptime = state.supervisor.uptime(&target).await;
            let status = match uptime {
                Some(up) => format!("🟢 Running ({})", format_duration(up.as_secs())),
                None => "🔴 Stopped".to_string(),
            };
            let _ = bot
                .edit_message_text(
                    chat_id,
                    message.id,
                    format!("⚙️ Manage: <code>{id}</code>\nStatus: {status}"),
                )
                .parse_mode(ParseMode::Html)
                .reply_markup(manage_keyboard(&target, uptime.is_some()))
                .await;
        }

        AppAction::Stop => match state.supervisor.stop(&target).await {
            Ok(true) => {
                audit_action(state, user, "stop", Some(&target), None);
                let _ = bot
                    .edit_message_text(chat_id, message.id, format!("🛑 Stopped <code>{id}</code>"))
                    .parse_mode(ParseMode::Html)
                    .await;
            }
            Ok(false) => {
                send_html(bot, chat_id, "⚠️ Already stopped.").await;
            }
            Err(e) => {
                warn!(target = %target, error = %e, "stop failed");
                audit_error(state, user, "stop", &e.to_string());
                send_html(bot, chat_id, format!("❌ Error: {}", escape_html(&e.to_string()))).await;
            }
        },

        AppAction::Rerun => {
            let _ = bot.delete_message(chat_id, message.id).await;
            return execute::execute(bot, chat_id, state, user, &target).await;
        }

        AppAction::Url => {
            let url = status_url(&state.cfg.public_base_url, &target);
            send_html(bot, chat_id, format!("🔗 <code>{}</code>", escape_html(&url))).await;
        }

        AppAction::Logs => {
            let log = state.workspace().paths(&target).log_file;
            if !log.is_file() {
                send_html(bot, chat_id, "❌ No logs yet.").await;
                return Ok(());
            }
            if let Err(e) = bot.send_document(chat_id, InputFile::file(log)).await {
                warn!(target = %target, error = %e, "failed to send log file");
                send_html(bot, chat_id, format!("❌ Error: {}", escape_html(&e.to_string()))).await;
            }
        }

        AppAction::Delete => match state.catalog.delete(&target).await {
            Ok(()) => {
                audit_action(state, user, "delete", Some(&target), None);
                let _ = bot
                    .edit_message_text(chat_id, message.id, format!("🗑️ Deleted <code>{id}</code>"))
                    .parse_mode(ParseMode::Html)
                    .await;
            }
            Err(e) => {
                warn!(target = %target, error = %e, "delete failed");
                audit_error(state, user, "delete", &e.to_string());
                send_html(bot, chat_id, format!("❌ Error: {}", escape_html(&e.to_string()))).await;
            }
        },
    }
    Ok(())
}
