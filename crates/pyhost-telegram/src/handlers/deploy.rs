use teloxide::{prelude::*, types::User};

use pyhost_core::{deploy::render_deploy_link, dialog::Step, domain::UserId, formatting::escape_html};

use crate::{cancel_keyboard, main_menu_keyboard, router::AppState, send_html, send_html_with};

use super::{audit_action, user_id};

pub(super) async fn begin(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    user: UserId,
) -> ResponseResult<()> {
    state.dialogs.begin(user, Step::AwaitDeployUrl).await;
    send_html_with(
        bot,
        chat_id,
        "🚀 <b>Deploy to Render</b>\n\n\
Send your PUBLIC GitHub repo URL.\n\
Example:\n\
https://github.com/user/repo",
        cancel_keyboard(),
    )
    .await;
    Ok(())
}

pub(super) async fn receive_url(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    user: &User,
    text: &str,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let Ok(link) = render_deploy_link(text) else {
        send_html(bot, chat_id, "❌ Invalid URL.").await;
        return Ok(());
    };

    state.dialogs.end(user_id(user)).await;
    audit_action(state, user, "deploy_link", None, Some(text.trim()));
    send_html_with(
        bot,
        chat_id,
        format!(
            "✅ Render Deploy Link:\n<code>{}</code>\n\n\
Open it in browser and deploy.\n\
Tip: add <code>render.yaml</code> in repo for 1-click blueprint deploy.",
            escape_html(&link)
        ),
        main_menu_keyboard(),
    )
    .await;
    Ok(())
}
