use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::filesystem::{
    ATTACHMENTS_DIR, CURRENT_FILE, EDIT_LOG_FILE, REVISIONS_DIR, format_revision,
    normalize_path, validate_attachment_filename,
};

/// Revision number written for attachment events; no real revision reaches it.
pub const ATTACHMENT_LOG_REVISION: u32 = 99_999_999;

/// Edit-log timestamps are stored in microseconds.
pub const EDIT_LOG_TIMESTAMP_SCALE: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    Save,
    AttachmentNew { filename: String },
}

impl EditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Save => "SAVE",
            Self::AttachmentNew { .. } => "ATTNEW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditLogEntry {
    pub timestamp: i64,
    pub revision: u32,
    pub page_name: String,
    pub address: String,
    pub author: String,
    pub comment: String,
    pub action: EditAction,
}

impl EditLogEntry {
    /// Render as one tab-separated line without the trailing newline.
    pub fn render(&self) -> String {
        let mut fields = vec![
            format!(
                "{}",
                i128::from(self.timestamp) * i128::from(EDIT_LOG_TIMESTAMP_SCALE)
            ),
            format_revision(self.revision),
            self.action.as_str().to_string(),
            sanitize_field(&self.page_name),
            sanitize_field(&self.address),
            sanitize_field(&self.author),
            sanitize_field(&self.comment),
        ];
        if let EditAction::AttachmentNew { filename } = &self.action {
            fields.push(sanitize_field(filename));
        }
        fields.join("\t")
    }
}

/// One page in the destination store. Directories are created on first write.
#[derive(Debug, Clone)]
pub struct PageDirectory {
    root: PathBuf,
}

impl PageDirectory {
    /// `page_name` must already be normalized.
    pub fn new(output_root: &Path, page_name: &str) -> Self {
        Self {
            root: output_root.join(page_name),
        }
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    pub fn edit_log_path(&self) -> PathBuf {
        self.root.join(EDIT_LOG_FILE)
    }

    pub fn revisions_dir(&self) -> PathBuf {
        self.root.join(REVISIONS_DIR)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_DIR)
    }

    pub fn revision_path(&self, revision: u32) -> PathBuf {
        self.revisions_dir().join(format_revision(revision))
    }

    /// Point `current` at `revision`, then write the revision file.
    /// The two writes are not atomic: an abort in between leaves `current`
    /// ahead of the revision files.
    pub fn write_revision(&self, revision: u32, content: &str) -> Result<()> {
        let revisions_dir = self.revisions_dir();
        fs::create_dir_all(&revisions_dir)
            .with_context(|| format!("failed to create {}", revisions_dir.display()))?;

        let current_path = self.current_path();
        fs::write(&current_path, format!("{}\n", format_revision(revision)))
            .with_context(|| format!("failed to write {}", current_path.display()))?;

        let revision_path = self.revision_path(revision);
        let mut body = String::with_capacity(content.len() + 1);
        body.push_str(content);
        body.push('\n');
        fs::write(&revision_path, body)
            .with_context(|| format!("failed to write {}", revision_path.display()))?;
        debug!("wrote {}", normalize_path(&revision_path));
        Ok(())
    }

    /// Add one entry and rewrite the whole log in sorted order.
    pub fn append_log(&self, entry: &EditLogEntry) -> Result<()> {
        let log_path = self.edit_log_path();
        let mut lines = if log_path.exists() {
            let content = fs::read_to_string(&log_path)
                .with_context(|| format!("failed to read {}", log_path.display()))?;
            content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };
        lines.push(entry.render());
        lines.sort();

        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let mut rendered = lines.join("\n");
        rendered.push('\n');
        fs::write(&log_path, rendered)
            .with_context(|| format!("failed to write {}", log_path.display()))?;
        Ok(())
    }

    /// Copy an attachment payload into `attachments/<filename>`.
    pub fn store_attachment(&self, source: &Path, filename: &str) -> Result<PathBuf> {
        validate_attachment_filename(filename)?;
        for dir in [self.revisions_dir(), self.attachments_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let target = self.attachments_dir().join(filename);
        fs::copy(source, &target).with_context(|| {
            format!(
                "failed to copy attachment {} to {}",
                source.display(),
                target.display()
            )
        })?;
        debug!("copied {}", normalize_path(&target));
        Ok(target)
    }
}

fn sanitize_field(value: &str) -> String {
    value.replace(['\t', '\r', '\n'], " ")
}
