//! Keeps the bulk directory's location out of span fields and log lines.

use std::path::Path;

/// The file name alone, for span fields.
pub fn redact_path(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => "<unknown>".to_string(),
    }
}

/// Replaces every occurrence of `path`'s parent directory in `message` with
/// `<dir>`. Error messages carry full paths; the ledger keeps them, logs
/// do not.
pub fn redact_message(message: &str, path: &Path) -> String {
    match path.parent().map(|p| p.to_string_lossy()) {
        Some(dir) if !dir.is_empty() && dir != "/" => message.replace(dir.as_ref(), "<dir>"),
        _ => message.to_string(),
    }
}
