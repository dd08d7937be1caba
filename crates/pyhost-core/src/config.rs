use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::UserId, errors::Error, Result};

/// Typed configuration for the hosting bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_id: Option<UserId>,

    // HTTP status server
    pub public_base_url: String,
    pub http_bind: SocketAddr,

    // Storage
    pub upload_dir: PathBuf,
    pub users_file: PathBuf,
    pub ownership_file: PathBuf,

    // External tools
    pub python_bin: PathBuf,
    pub pip_bin: PathBuf,
    pub git_bin: PathBuf,

    // Supervision
    pub startup_grace: Duration,
    pub stop_timeout: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TOKEN")
            .and_then(non_empty)
            .or_else(|| env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("TOKEN environment variable is required".to_string())
            })?;

        let admin_id = env_i64("ADMIN_ID").filter(|id| *id != 0).map(UserId);

        let public_base_url = env_str("RENDER_EXTERNAL_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let port = env_u16("PORT").unwrap_or(8080);
        let bind_ip = env_str("HTTP_BIND")
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let http_bind = SocketAddr::new(bind_ip, port);

        let upload_dir = env_path("UPLOAD_DIR").unwrap_or_else(|| PathBuf::from("scripts"));
        fs::create_dir_all(&upload_dir)?;

        let users_file =
            env_path("USERS_FILE").unwrap_or_else(|| PathBuf::from("allowed_users.json"));
        let ownership_file =
            env_path("OWNERSHIP_FILE").unwrap_or_else(|| PathBuf::from("ownership.json"));

        let python_bin = env_path("PYTHON_BIN").unwrap_or_else(|| PathBuf::from("python"));
        let pip_bin = env_path("PIP_BIN").unwrap_or_else(|| PathBuf::from("pip"));
        let git_bin = env_path("GIT_BIN").unwrap_or_else(|| PathBuf::from("git"));

        let startup_grace =
            Duration::from_millis(env_u64("STARTUP_GRACE_MS").unwrap_or(2_000));
        let stop_timeout = Duration::from_millis(env_u64("STOP_TIMEOUT_MS").unwrap_or(10_000));

        let audit_log_path =
            env_path("AUDIT_LOG_PATH").unwrap_or_else(|| PathBuf::from("audit.log"));
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            admin_id,
            public_base_url,
            http_bind,
            upload_dir,
            users_file,
            ownership_file,
            python_bin,
            pip_bin,
            git_bin,
            startup_grace,
            stop_timeout,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env_str(key).and_then(|s| s.trim().parse::<u16>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_str(key).and_then(non_empty).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_strips_quotes_and_comments() {
        let parsed = parse_dotenv(
            "# comment\n\nTOKEN=\"abc\"\nADMIN_ID = 42\nNAME='x y'\nbroken line\n=novalue\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("TOKEN".to_string(), "abc".to_string()),
                ("ADMIN_ID".to_string(), "42".to_string()),
                ("NAME".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn dotenv_keeps_equals_in_value() {
        let parsed = parse_dotenv("URL=https://x.test/?a=b");
        assert_eq!(parsed[0].1, "https://x.test/?a=b");
    }
}
