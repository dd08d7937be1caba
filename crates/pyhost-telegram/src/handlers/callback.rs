use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use pyhost_core::callback::{parse, Callback};

use crate::router::AppState;

use super::{deny, git, manage, user_id};

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    // Always answer so the client stops its spinner.
    let _ = bot.answer_callback_query(q.id.clone()).await;

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let data = q.data.clone().unwrap_or_default();
    if data.is_empty() {
        return Ok(());
    }

    if !state.access.is_allowed(user_id(&q.from)) {
        deny(&bot, message.chat.id, &state, &q.from, "callback").await;
        return Ok(());
    }

    match parse(&data) {
        Some(Callback::SelectEntry(index)) => {
            git::select_entry(&bot, message, &state, &q.from, index).await
        }
        Some(Callback::App(action, key)) => {
            manage::handle_action(&bot, message, &state, &q.from, action, key).await
        }
        None => {
            debug!(data = %data, "ignoring unknown callback data");
            Ok(())
        }
    }
}
