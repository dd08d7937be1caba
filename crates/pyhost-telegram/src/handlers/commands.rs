use std::sync::Arc;

use teloxide::prelude::*;

use pyhost_core::{
    audit::AuditEvent,
    domain::UserId,
    formatting::escape_html,
};

use crate::{main_menu_keyboard, router::AppState, send_html, send_html_with};

use super::{audit_action, audit_error, deny, user_id};

const SUPER_ADMIN_ONLY: &str = "⛔ Super Admin Only.";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn parse_user_arg(arg: &str) -> Option<UserId> {
    arg.split_whitespace()
        .next()?
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(UserId)
}

fn help_text(is_admin: bool) -> String {
    let mut body = String::from(
        "🆘 <b>Help</b>\n\n\
📤 <b>Upload File</b> - send a <code>.py</code> script, optionally attach \
<code>requirements.txt</code> and <code>.env</code>, then run it.\n\
🌐 <b>Clone from Git</b> - clone a public repository and pick its entry file.\n\
🚀 <b>Deploy to Render</b> - get a one-click Render deploy link for a repository.\n\
📂 <b>My Hosted Apps</b> - run, stop, read logs or delete your apps.\n\
📊 <b>Server Stats</b> - CPU, memory, disk and uptime.\n\n\
Every running app has a status URL you can point an uptime monitor at.\n\
/cancel aborts the current step.",
    );
    if is_admin {
        body.push_str(
            "\n\n<b>👑 Admin:</b>\n\
/adduser &lt;id&gt; - allow a user\n\
/removeuser &lt;id&gt; - revoke a user\n\
/users - list allowed users",
        );
    }
    body
}

pub(super) async fn send_help(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    user: UserId,
) -> ResponseResult<()> {
    send_html_with(
        bot,
        chat_id,
        help_text(state.access.is_admin(user)),
        main_menu_keyboard(),
    )
    .await;
    Ok(())
}

pub(super) async fn cancel(bot: &Bot, chat_id: ChatId) -> ResponseResult<()> {
    send_html_with(bot, chat_id, "🚫 Operation Cancelled.", main_menu_keyboard()).await;
    Ok(())
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let uid = user_id(user);
    let chat_id = msg.chat.id;
    let (cmd, arg) = parse_command(text);

    match cmd.as_str() {
        "start" => {
            if !state.access.is_allowed(uid) {
                deny(&bot, chat_id, &state, user, "start").await;
                return Ok(());
            }
            state.dialogs.end(uid).await;
            send_html_with(
                &bot,
                chat_id,
                "👋 <b>Python &amp; Git Hosting Bot</b>",
                main_menu_keyboard(),
            )
            .await;
            Ok(())
        }

        "help" => {
            if !state.access.is_allowed(uid) {
                deny(&bot, chat_id, &state, user, "help").await;
                return Ok(());
            }
            send_help(&bot, chat_id, &state, uid).await
        }

        "cancel" => {
            state.dialogs.end(uid).await;
            cancel(&bot, chat_id).await
        }

        "adduser" | "removeuser" | "users" => {
            if !state.access.is_admin(uid) {
                state.audit.record(AuditEvent::denied(
                    uid,
                    user.username.as_deref(),
                    &cmd,
                ));
                send_html(&bot, chat_id, SUPER_ADMIN_ONLY).await;
                return Ok(());
            }
            admin_command(&bot, chat_id, &state, user, &cmd, &arg).await
        }

        _ => {
            if state.access.is_allowed(uid) {
                send_html(&bot, chat_id, "❓ Unknown command. Try /help.").await;
            }
            Ok(())
        }
    }
}

async fn admin_command(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    user: &teloxide::types::User,
    cmd: &str,
    arg: &str,
) -> ResponseResult<()> {
    let users = state.access.users();

    if cmd == "users" {
        let list = users.list();
        let body = if list.is_empty() {
            "👥 No allowed users yet.".to_string()
        } else {
            let lines: Vec<String> = list.iter().map(|u| format!("• <code>{u}</code>")).collect();
            format!("👥 <b>Allowed users</b> ({})\n{}", list.len(), lines.join("\n"))
        };
        send_html(bot, chat_id, body).await;
        return Ok(());
    }

    let Some(target) = parse_user_arg(arg) else {
        send_html(bot, chat_id, format!("Usage: /{cmd} &lt;user_id&gt;")).await;
        return Ok(());
    };

    let result = if cmd == "adduser" {
        users.add(target)
    } else {
        users.remove(target)
    };

    let body = match (cmd, result) {
        ("adduser", Ok(true)) => {
            audit_action(state, user, "user_add", None, Some(&target.to_string()));
            format!("✅ User <code>{target}</code> added.")
        }
        ("adduser", Ok(false)) => format!("ℹ️ User <code>{target}</code> is already allowed."),
        (_, Ok(true)) => {
            audit_action(state, user, "user_remove", None, Some(&target.to_string()));
            format!("🗑️ User <code>{target}</code> removed.")
        }
        (_, Ok(false)) => format!("ℹ️ User <code>{target}</code> was not in the list."),
        (_, Err(e)) => {
            audit_error(state, user, cmd, &e.to_string());
            format!("❌ Error: {}", escape_html(&e.to_string()))
        }
    };
    send_html(bot, chat_id, body).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_bot_suffix() {
        assert_eq!(
            parse_command("/adduser@my_bot 123"),
            ("adduser".to_string(), "123".to_string())
        );
        assert_eq!(parse_command("/START"), ("start".to_string(), String::new()));
    }

    #[test]
    fn user_args() {
        assert_eq!(parse_user_arg("42"), Some(UserId(42)));
        assert_eq!(parse_user_arg(" 42 extra"), Some(UserId(42)));
        assert_eq!(parse_user_arg("abc"), None);
        assert_eq!(parse_user_arg("-5"), None);
        assert_eq!(parse_user_arg(""), None);
    }

    #[test]
    fn admin_help_lists_admin_commands() {
        assert!(!help_text(false).contains("/adduser"));
        assert!(help_text(true).contains("/adduser &lt;id&gt;"));
    }
}
