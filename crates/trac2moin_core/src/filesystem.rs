use std::path::{Component, Path};

use anyhow::{Result, bail};

pub const CURRENT_FILE: &str = "current";
pub const EDIT_LOG_FILE: &str = "edit-log";
pub const REVISIONS_DIR: &str = "revisions";
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Escape codes MoinMoin uses for characters it will not keep in directory names.
const ESCAPED_CHARACTERS: &[(char, &str)] = &[('/', "(2f)"), ('-', "(2d)")];

/// Map a logical page name to the directory name used by the page store.
pub fn normalize_page_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ESCAPED_CHARACTERS.iter().find(|(reserved, _)| *reserved == ch) {
            Some((_, code)) => out.push_str(code),
            None => out.push(ch),
        }
    }
    out
}

/// Zero-padded revision file name, also used for `current` and edit-log entries.
pub fn format_revision(revision: u32) -> String {
    format!("{revision:08}")
}

pub fn parse_revision(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Attachment file names are joined onto `attachments/`; they must stay a single component.
pub fn validate_attachment_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        bail!("attachment filename is empty");
    }
    if filename.contains('/') || filename.contains('\\') {
        bail!("attachment filename contains a path separator: {filename}");
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => bail!("attachment filename escapes the attachments directory: {filename}"),
    }
}

pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
