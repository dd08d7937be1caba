use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, User},
};
use tracing::warn;

use pyhost_core::{
    callback::select_entry as select_entry_data,
    dialog::Step,
    domain::{TargetId, UserId},
    formatting::escape_html,
    repo::{checkout, repo_taken_by_other},
    workspace::repo_name_from_url,
};

use crate::{
    cancel_keyboard, extras_keyboard, main_menu_keyboard, router::AppState, send_html,
    send_html_with,
};

use super::{audit_action, audit_error, edit_or_send, install_requirements, user_id};

pub(super) async fn begin(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    user: UserId,
) -> ResponseResult<()> {
    state.dialogs.begin(user, Step::AwaitRepoUrl).await;
    send_html_with(bot, chat_id, "🌐 Send PUBLIC Git repo URL", cancel_keyboard()).await;
    Ok(())
}

pub(super) async fn receive_url(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    user: &User,
    text: &str,
) -> ResponseResult<()> {
    let uid = user_id(user);
    let chat_id = msg.chat.id;
    let url = text.trim();

    let Ok(name) = repo_name_from_url(url) else {
        send_html(bot, chat_id, "❌ Invalid URL.").await;
        return Ok(());
    };
    if repo_taken_by_other(&state.ownership, &state.access, &name, uid) {
        send_html(
            bot,
            chat_id,
            format!(
                "❌ Taken! <code>{}</code> is hosted by another user.",
                escape_html(&name)
            ),
        )
        .await;
        return Ok(());
    }

    let progress = send_html(
        bot,
        chat_id,
        format!("⏳ Cloning <code>{}</code> ...", escape_html(&name)),
    )
    .await;

    let co = match checkout(state.workspace(), state.fetcher.as_ref(), url).await {
        Ok(co) => co,
        Err(e) => {
            warn!(url, error = %e, "clone failed");
            audit_error(state, user, "clone", &e.to_string());
            state.dialogs.end(uid).await;
            edit_or_send(
                bot,
                chat_id,
                progress,
                format!("❌ Clone Failed: <code>{}</code>", escape_html(&e.to_string())),
            )
            .await;
            send_html_with(bot, chat_id, "Back to menu.", main_menu_keyboard()).await;
            return Ok(());
        }
    };
    audit_action(state, user, "clone", None, Some(url));
    edit_or_send(bot, chat_id, progress, "✅ Cloned Successfully!".to_string()).await;

    if co.entries.is_empty() {
        state.dialogs.end(uid).await;
        send_html_with(bot, chat_id, "❌ No .py found.", main_menu_keyboard()).await;
        return Ok(());
    }

    if let Some(req) = co.root_requirements() {
        send_html(bot, chat_id, "📦 Installing repo requirements.txt ...").await;
        install_requirements(bot, chat_id, state, user, &req).await;
    }

    let rows: Vec<Vec<InlineKeyboardButton>> = co
        .choices()
        .iter()
        .enumerate()
        .map(|(i, entry)| vec![InlineKeyboardButton::callback(entry.clone(), select_entry_data(i))])
        .collect();
    let mut prompt = "👇 Select main file:".to_string();
    if co.entries.len() > rows.len() {
        prompt.push_str(&format!(
            "\n<i>Showing {} of {} .py files.</i>",
            rows.len(),
            co.entries.len()
        ));
    }

    state
        .dialogs
        .update(uid, |d| {
            d.step = Step::AwaitEntry;
            d.checkout = Some(co);
        })
        .await;
    send_html_with(bot, chat_id, prompt, InlineKeyboardMarkup::new(rows)).await;
    Ok(())
}

/// Entry button pressed after a clone.
pub(super) async fn select_entry(
    bot: &Bot,
    message: &Message,
    state: &AppState,
    user: &User,
    index: usize,
) -> ResponseResult<()> {
    let uid = user_id(user);
    let chat_id = message.chat.id;

    let checkout = state
        .dialogs
        .get(uid)
        .await
        .filter(|d| d.step == Step::AwaitEntry)
        .and_then(|d| d.checkout);
    let Some(co) = checkout else {
        send_html(bot, chat_id, "⌛ Selection expired. Clone the repository again.").await;
        return Ok(());
    };
    let Some(entry) = co.choices().get(index).cloned() else {
        send_html(bot, chat_id, "❌ Invalid option.").await;
        return Ok(());
    };

    let target = match TargetId::repo(&co.name, &entry) {
        Ok(t) => t,
        Err(e) => {
            send_html(bot, chat_id, format!("❌ {}", escape_html(&e.to_string()))).await;
            return Ok(());
        }
    };
    if let Err(e) = state.ownership.set(&target, uid) {
        audit_error(state, user, "select", &e.to_string());
        send_html(bot, chat_id, format!("❌ Error: {}", escape_html(&e.to_string()))).await;
        return Ok(());
    }
    audit_action(state, user, "select", Some(&target), None);

    state
        .dialogs
        .update(uid, |d| {
            d.step = Step::AwaitRepoExtras;
            d.target = Some(target.clone());
            d.pending = None;
            d.checkout = None;
        })
        .await;

    let _ = bot
        .edit_message_text(
            chat_id,
            message.id,
            format!("✅ Selected <code>{}</code>", escape_html(&entry)),
        )
        .parse_mode(ParseMode::Html)
        .await;
    send_html_with(
        bot,
        chat_id,
        "Add extras (optional) then RUN:",
        extras_keyboard(),
    )
    .await;
    Ok(())
}
