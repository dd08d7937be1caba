//! "Deploy to Render" links for public repositories.

use crate::{errors::Error, Result};

const RENDER_DEPLOY: &str = "https://render.com/deploy?repo=";

pub fn render_deploy_link(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if !raw.starts_with("http") {
        return Err(Error::InvalidUrl(raw.to_string()));
    }
    let trimmed = raw.trim_end_matches('/');
    let repo = trimmed.strip_suffix(".git").unwrap_or(trimmed).trim();
    let encoded: String = url::form_urlencoded::byte_serialize(repo.as_bytes()).collect();
    Ok(format!("{RENDER_DEPLOY}{encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_encoded_link() {
        assert_eq!(
            render_deploy_link(" https://github.com/user/repo.git ").unwrap(),
            "https://render.com/deploy?repo=https%3A%2F%2Fgithub.com%2Fuser%2Frepo"
        );
        assert_eq!(
            render_deploy_link("https://github.com/user/repo/").unwrap(),
            "https://render.com/deploy?repo=https%3A%2F%2Fgithub.com%2Fuser%2Frepo"
        );
    }

    #[test]
    fn rejects_non_http() {
        assert!(render_deploy_link("github.com/user/repo").is_err());
        assert!(render_deploy_link("").is_err());
    }
}
