//! Inline button payloads.
//!
//! Telegram caps `callback_data` at 64 bytes. Ids that do not fit are sent as
//! `<prefix>#<hash>` and resolved back against the known targets.

use sha2::{Digest, Sha256};

use crate::domain::TargetId;

pub const MAX_CALLBACK_DATA: usize = 64;

const HASH_MARK: char = '#';
const HASH_HEX_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppAction {
    Manage,
    Stop,
    Rerun,
    Url,
    Logs,
    Delete,
}

impl AppAction {
    const ALL: [AppAction; 6] = [
        AppAction::Manage,
        AppAction::Stop,
        AppAction::Rerun,
        AppAction::Url,
        AppAction::Logs,
        AppAction::Delete,
    ];

    fn prefix(self) -> &'static str {
        match self {
            AppAction::Manage => "man_",
            AppAction::Stop => "stop_",
            AppAction::Rerun => "rerun_",
            AppAction::Url => "url_",
            AppAction::Logs => "log_",
            AppAction::Delete => "del_",
        }
    }
}

const SELECT_ENTRY: &str = "sel_py_";

/// A target reference as carried by a button.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetKey {
    Id(String),
    Hash(String),
}

impl TargetKey {
    /// Resolve against known targets.
    pub fn resolve<'a>(&self, known: impl IntoIterator<Item = &'a TargetId>) -> Option<TargetId> {
        match self {
            TargetKey::Id(raw) => TargetId::parse(raw).ok(),
            TargetKey::Hash(h) => known.into_iter().find(|t| short_hash(t) == *h).cloned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    /// Pick the n-th entry of the last repository listing.
    SelectEntry(usize),
    App(AppAction, TargetKey),
}

pub fn select_entry(index: usize) -> String {
    format!("{SELECT_ENTRY}{index}")
}

pub fn app(action: AppAction, target: &TargetId) -> String {
    let plain = format!("{}{}", action.prefix(), target.as_str());
    if plain.len() <= MAX_CALLBACK_DATA {
        return plain;
    }
    format!("{}{HASH_MARK}{}", action.prefix(), short_hash(target))
}

pub fn parse(data: &str) -> Option<Callback> {
    if let Some(idx) = data.strip_prefix(SELECT_ENTRY) {
        return idx.parse().ok().map(Callback::SelectEntry);
    }
    for action in AppAction::ALL {
        let Some(rest) = data.strip_prefix(action.prefix()) else {
            continue;
        };
        let key = match rest.strip_prefix(HASH_MARK) {
            Some(h) if h.len() == HASH_HEX_LEN => TargetKey::Hash(h.to_string()),
            _ => TargetKey::Id(rest.to_string()),
        };
        return Some(Callback::App(action, key));
    }
    None
}

fn short_hash(target: &TargetId) -> String {
    let digest = Sha256::digest(target.as_str().as_bytes());
    digest
        .iter()
        .take(HASH_HEX_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_stay_readable() {
        let t = TargetId::parse("bot.py").unwrap();
        assert_eq!(app(AppAction::Manage, &t), "man_bot.py");
        assert_eq!(app(AppAction::Delete, &t), "del_bot.py");
        assert_eq!(
            parse("stop_bot.py"),
            Some(Callback::App(AppAction::Stop, TargetKey::Id("bot.py".into())))
        );
        assert_eq!(parse("sel_py_3"), Some(Callback::SelectEntry(3)));
        assert_eq!(parse("sel_py_x"), None);
        assert_eq!(parse("askuser:1:2"), None);
    }

    #[test]
    fn long_ids_are_hashed_and_resolved() {
        let long = TargetId::repo(
            "a-really-long-repository-name",
            "with/a/deeply/nested/package/entrypoint_main.py",
        )
        .unwrap();
        let other = TargetId::parse("bot.py").unwrap();

        let data = app(AppAction::Logs, &long);
        assert!(data.len() <= MAX_CALLBACK_DATA);
        assert!(data.starts_with("log_#"));

        let Some(Callback::App(AppAction::Logs, key)) = parse(&data) else {
            panic!("unexpected parse of {data}");
        };
        let known = vec![other, long.clone()];
        assert_eq!(key.resolve(&known), Some(long));
    }

    #[test]
    fn repo_ids_with_separator_parse() {
        let t = TargetId::parse("repo|main.py").unwrap();
        let Some(Callback::App(AppAction::Rerun, key)) = parse(&app(AppAction::Rerun, &t)) else {
            panic!("expected rerun");
        };
        assert_eq!(key.resolve(&Vec::<TargetId>::new()), Some(t));
    }
}
