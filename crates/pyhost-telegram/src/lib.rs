//! Telegram adapter (teloxide).
//!
//! Turns chat updates into calls on `pyhost-core` and renders the results as
//! HTML messages and keyboards.

use teloxide::{
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup, ParseMode, ReplyMarkup},
};
use tracing::warn;

pub mod handlers;
pub mod router;

pub const BTN_UPLOAD: &str = "📤 Upload File";
pub const BTN_CLONE: &str = "🌐 Clone from Git";
pub const BTN_DEPLOY: &str = "🚀 Deploy to Render";
pub const BTN_APPS: &str = "📂 My Hosted Apps";
pub const BTN_STATS: &str = "📊 Server Stats";
pub const BTN_HELP: &str = "🆘 Help";

pub const BTN_ADD_REQS: &str = "➕ Add reqs";
pub const BTN_ADD_ENV: &str = "➕ Add .env";
pub const BTN_CANCEL: &str = "🔙 Cancel";

/// A main-menu button (or the cancel button) pressed on the reply keyboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuAction {
    Upload,
    Clone,
    Deploy,
    Apps,
    Stats,
    Help,
    Cancel,
}

impl MenuAction {
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text.trim() {
            BTN_UPLOAD => MenuAction::Upload,
            BTN_CLONE => MenuAction::Clone,
            BTN_DEPLOY => MenuAction::Deploy,
            BTN_APPS => MenuAction::Apps,
            BTN_STATS => MenuAction::Stats,
            BTN_HELP => MenuAction::Help,
            BTN_CANCEL => MenuAction::Cancel,
            _ => return None,
        })
    }
}

fn keyboard(rows: &[&[&str]]) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = rows
        .iter()
        .map(|row| row.iter().map(|label| KeyboardButton::new(*label)).collect())
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard(true)
}

pub fn main_menu_keyboard() -> KeyboardMarkup {
    keyboard(&[
        &[BTN_UPLOAD, BTN_CLONE],
        &[BTN_DEPLOY, BTN_APPS],
        &[BTN_STATS, BTN_HELP],
    ])
}

pub fn extras_keyboard() -> KeyboardMarkup {
    keyboard(&[
        &[BTN_ADD_REQS, BTN_ADD_ENV],
        &[pyhost_core::dialog::RUN_NOW, BTN_CANCEL],
    ])
}

pub fn cancel_keyboard() -> KeyboardMarkup {
    keyboard(&[&[BTN_CANCEL]])
}

/// Send an HTML message, logging (not propagating) failures.
pub async fn send_html(bot: &Bot, chat_id: ChatId, html: impl Into<String>) -> Option<Message> {
    match bot
        .send_message(chat_id, html.into())
        .parse_mode(ParseMode::Html)
        .await
    {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(chat_id = chat_id.0, error = %e, "failed to send message");
            None
        }
    }
}

/// Like [`send_html`], with a keyboard attached.
pub async fn send_html_with(
    bot: &Bot,
    chat_id: ChatId,
    html: impl Into<String>,
    markup: impl Into<ReplyMarkup>,
) -> Option<Message> {
    match bot
        .send_message(chat_id, html.into())
        .parse_mode(ParseMode::Html)
        .reply_markup(markup)
        .await
    {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(chat_id = chat_id.0, error = %e, "failed to send message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_buttons_round_trip() {
        for label in [
            BTN_UPLOAD, BTN_CLONE, BTN_DEPLOY, BTN_APPS, BTN_STATS, BTN_HELP, BTN_CANCEL,
        ] {
            assert!(MenuAction::parse(label).is_some(), "{label}");
        }
        assert_eq!(MenuAction::parse("📤 Upload File"), Some(MenuAction::Upload));
        assert_eq!(MenuAction::parse(BTN_ADD_REQS), None);
        assert_eq!(MenuAction::parse("hello"), None);
    }

    #[test]
    fn keyboards_have_expected_layout() {
        let main = main_menu_keyboard();
        assert_eq!(main.keyboard.len(), 3);
        assert_eq!(main.keyboard[0][0].text, BTN_UPLOAD);
        assert_eq!(main.keyboard[2][1].text, BTN_HELP);

        let extras = extras_keyboard();
        assert_eq!(extras.keyboard[1][0].text, "🚀 RUN NOW");
        assert_eq!(cancel_keyboard().keyboard[0][0].text, BTN_CANCEL);
    }
}
