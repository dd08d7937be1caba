use teloxide::{
    prelude::*,
    types::{Document, User},
};
use tracing::warn;

use pyhost_core::{
    dialog::{extras_choice, Dialog, ExtrasChoice, PendingUpload, Step},
    domain::{TargetId, UserId},
    formatting::escape_html,
};

use crate::{
    cancel_keyboard, extras_keyboard, main_menu_keyboard, router::AppState, send_html,
    send_html_with,
};

use super::{audit_action, audit_error, download_to, execute, install_requirements, user_id};

pub(super) async fn begin(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    user: UserId,
) -> ResponseResult<()> {
    state.dialogs.begin(user, Step::AwaitScript).await;
    send_html_with(bot, chat_id, "📤 Send a <code>.py</code> file.", cancel_keyboard()).await;
    Ok(())
}

pub(super) async fn receive_script(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    user: &User,
    doc: &Document,
) -> ResponseResult<()> {
    let uid = user_id(user);
    let chat_id = msg.chat.id;
    let file_name = doc.file_name.clone().unwrap_or_default();

    if !file_name.ends_with(".py") {
        send_html(bot, chat_id, "❌ Only .py allowed").await;
        return Ok(());
    }
    let target = match TargetId::file(&file_name) {
        Ok(t) => t,
        Err(e) => {
            send_html(bot, chat_id, format!("❌ {}", escape_html(&e.to_string()))).await;
            return Ok(());
        }
    };

    let paths = state.workspace().paths(&target);
    let script = paths.script_abs();
    let owner = state.ownership.owner_of(&target);
    if !state.access.can_claim_file(uid, owner, script.exists()) {
        send_html(
            bot,
            chat_id,
            format!(
                "❌ Taken! <code>{}</code> is owned by another user.",
                escape_html(&file_name)
            ),
        )
        .await;
        return Ok(());
    }

    if let Err(e) = download_to(bot, &doc.file.id, &script).await {
        warn!(target = %target, error = %e, "script download failed");
        audit_error(state, user, "upload", &e.to_string());
        send_html(
            bot,
            chat_id,
            format!("❌ Download failed: {}", escape_html(&e.to_string())),
        )
        .await;
        return Ok(());
    }
    if let Err(e) = state.ownership.set(&target, uid) {
        audit_error(state, user, "upload", &e.to_string());
        send_html(bot, chat_id, format!("❌ Error: {}", escape_html(&e.to_string()))).await;
        return Ok(());
    }
    audit_action(state, user, "upload", Some(&target), None);

    state
        .dialogs
        .update(uid, |d| {
            d.step = Step::AwaitExtras;
            d.target = Some(target.clone());
            d.pending = None;
        })
        .await;

    send_html_with(
        bot,
        chat_id,
        "✅ Saved. Add extras (optional)?",
        extras_keyboard(),
    )
    .await;
    Ok(())
}

/// A reply-keyboard press while the extras keyboard is shown.
pub(super) async fn receive_extras_choice(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    user: &User,
    dialog: &Dialog,
    text: &str,
) -> ResponseResult<()> {
    let uid = user_id(user);
    let chat_id = msg.chat.id;

    let pending = match extras_choice(text) {
        ExtrasChoice::Run => {
            let Some(target) = dialog.target.clone() else {
                state.dialogs.end(uid).await;
                send_html_with(bot, chat_id, "❌ Missing target ID", main_menu_keyboard()).await;
                return Ok(());
            };
            return execute::execute(bot, chat_id, state, user, &target).await;
        }
        ExtrasChoice::Requirements => {
            send_html(bot, chat_id, "📂 Send <code>requirements.txt</code> now.").await;
            PendingUpload::Requirements
        }
        ExtrasChoice::Env => {
            send_html(bot, chat_id, "🔒 Send <code>.env</code> now.").await;
            PendingUpload::Env
        }
        ExtrasChoice::Unknown => return Ok(()),
    };

    state
        .dialogs
        .update(uid, |d| d.pending = Some(pending))
        .await;
    Ok(())
}

/// A document while the extras keyboard is shown.
///
/// Only accepted after `➕ Add reqs` / `➕ Add .env`; a document with the wrong
/// extension is dropped and the choice has to be made again.
pub(super) async fn receive_extra_file(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    user: &User,
    dialog: &Dialog,
    doc: &Document,
) -> ResponseResult<()> {
    let uid = user_id(user);
    let chat_id = msg.chat.id;

    let (Some(pending), Some(target)) = (dialog.pending, dialog.target.as_ref()) else {
        return Ok(());
    };
    let file_name = doc.file_name.as_deref().unwrap_or("");
    let paths = state.workspace().paths(target);

    if pending.accepts(file_name) {
        let dest = match pending {
            PendingUpload::Requirements => &paths.requirements,
            PendingUpload::Env => &paths.env_file,
        };
        match download_to(bot, &doc.file.id, dest).await {
            Ok(()) => match pending {
                PendingUpload::Requirements => {
                    install_requirements(bot, chat_id, state, user, dest).await;
                }
                PendingUpload::Env => {
                    audit_action(state, user, "env", Some(target), None);
                    send_html(bot, chat_id, "✅ Env saved.").await;
                }
            },
            Err(e) => {
                warn!(target = %target, error = %e, "extra file download failed");
                audit_error(state, user, "extras", &e.to_string());
                send_html(
                    bot,
                    chat_id,
                    format!("❌ Download failed: {}", escape_html(&e.to_string())),
                )
                .await;
            }
        }
    }

    state.dialogs.update(uid, |d| d.pending = None).await;
    send_html_with(bot, chat_id, "Next?", extras_keyboard()).await;
    Ok(())
}
