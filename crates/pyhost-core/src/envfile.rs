//! Per-app `.env` overrides applied when launching a hosted script.

use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path};

use crate::Result;

/// Parse `.env` text into key/value overrides.
///
/// Blank lines, `#` comments and lines without `=` are skipped; the first `=`
/// splits key from value and both sides are trimmed. Later keys win.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        out.insert(k.trim().to_string(), v.trim().to_string());
    }
    out
}

/// Load overrides from `path`; a missing file means no overrides.
pub fn load(path: &Path) -> Result<BTreeMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse(&text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}
