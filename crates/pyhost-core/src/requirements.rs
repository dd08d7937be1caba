//! Requirements files attached to hosted apps.
//!
//! Users often paste `pip install a b c` into a requirements file; those lines
//! are expanded into one package per line before pip sees them.

use std::{fs, path::Path};

use tracing::{info, warn};

use crate::{
    formatting::tail_chars,
    ports::{InstallOutcome, PackageInstaller},
    Result,
};

const PIP_INSTALL: &str = "pip install";

/// Max chars of installer stderr kept for the user-facing failure message.
pub const INSTALL_ERROR_TAIL: usize = 900;

pub fn normalize_requirements(text: &str) -> String {
    let mut clean: Vec<String> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let is_pip_line = line
            .get(..PIP_INSTALL.len())
            .map(|head| head.eq_ignore_ascii_case(PIP_INSTALL))
            .unwrap_or(false);
        if is_pip_line {
            clean.extend(
                line[PIP_INSTALL.len()..]
                    .split_whitespace()
                    .map(str::to_string),
            );
        } else {
            clean.push(line.to_string());
        }
    }
    clean.join("\n")
}

/// Rewrite a requirements file in place.
pub fn fix_requirements_file(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)?;
    fs::write(path, normalize_requirements(&text))?;
    Ok(())
}

/// Normalize then install a requirements file.
///
/// A file that cannot be normalized is still handed to the installer as-is.
pub async fn install(installer: &dyn PackageInstaller, path: &Path) -> Result<InstallOutcome> {
    if let Err(e) = fix_requirements_file(path) {
        warn!(path = %path.display(), error = %e, "could not normalize requirements");
    }

    let mut outcome = installer.install(path).await?;
    if outcome.success {
        info!(path = %path.display(), "requirements installed");
    } else {
        warn!(path = %path.display(), "requirements install failed");
        outcome.stderr_tail = tail_chars(&outcome.stderr_tail, INSTALL_ERROR_TAIL).to_string();
    }
    Ok(outcome)
}
