//! Append-only audit trail of user actions.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{TargetId, UserId},
    errors::Error,
    formatting::truncate_text,
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    pub user_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, user: UserId, username: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user_id: user.0,
            username: username.map(str::to_string),
            action: None,
            target: None,
            detail: None,
            error: None,
        }
    }

    /// A state-changing action (`upload`, `clone`, `run`, `stop`, `delete`, ...).
    pub fn action(
        user: UserId,
        username: Option<&str>,
        action: &str,
        target: Option<&TargetId>,
        detail: Option<&str>,
    ) -> Self {
        Self {
            action: Some(action.to_string()),
            target: target.map(|t| t.to_string()),
            detail: detail.map(str::to_string),
            ..Self::base("action", user, username)
        }
    }

    pub fn denied(user: UserId, username: Option<&str>, what: &str) -> Self {
        Self {
            action: Some(what.to_string()),
            ..Self::base("denied", user, username)
        }
    }

    pub fn error(user: UserId, username: Option<&str>, context: &str, error: &str) -> Self {
        Self {
            action: Some(context.to_string()),
            error: Some(error.to_string()),
            ..Self::base("error", user, username)
        }
    }
}

#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
    lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        for field in [&mut event.detail, &mut event.error] {
            if let Some(s) = field.as_deref() {
                *field = Some(truncate_text(s, AUDIT_MAX_TEXT));
            }
        }

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write, logging instead of failing.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_with_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), true);
        let target = TargetId::parse("bot.py").unwrap();
        let detail = "d".repeat(AUDIT_MAX_TEXT + 20);

        log.write(AuditEvent::action(
            UserId(7),
            Some("alice"),
            "run",
            Some(&target),
            Some(&detail),
        ))
        .unwrap();
        log.record(AuditEvent::denied(UserId(8), None, "start"));

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["action"], "run");
        assert_eq!(lines[0]["target"], "bot.py");
        assert!(lines[0]["detail"].as_str().unwrap().ends_with("..."));
        assert_eq!(lines[1]["event"], "denied");
        assert!(lines[1].get("username").is_none());
    }

    #[test]
    fn plain_text_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), false);
        log.write(AuditEvent::error(UserId(1), Some("bob"), "clone", "boom"))
            .unwrap();
        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: error"));
        assert!(written.contains("error: boom"));
        assert!(written.contains("user_id: 1"));
    }
}
