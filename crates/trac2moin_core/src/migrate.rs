use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::export::{ATTACHMENT_LOG_REVISION, EditAction, EditLogEntry, PageDirectory};
use crate::filesystem::{normalize_page_name, normalize_path};
use crate::identmap::{IdentifierMap, load_identifier_map};
use crate::runtime::{FixupIdentity, ResolvedRun};
use crate::source::SourceStore;
use crate::translate::Translator;

/// Everything the driver needs, built once before the first write.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub output_dir: PathBuf,
    pub page_map: IdentifierMap,
    pub user_map: IdentifierMap,
    pub prefix: String,
    pub inline_fixups: bool,
    pub exclude_author: String,
    pub fixup: FixupIdentity,
    /// Edit-log timestamp for synthetic fixup revisions.
    pub fixup_timestamp: i64,
}

impl MigrationSettings {
    /// Load both identifier maps. Map errors surface here, before any output exists.
    pub fn load(run: &ResolvedRun) -> Result<Self> {
        let page_map = match run.namemap_path.as_deref() {
            Some(path) => load_identifier_map(path)?,
            None => IdentifierMap::default(),
        };
        let user_map = match run.usermap_path.as_deref() {
            Some(path) => load_identifier_map(path)?,
            None => IdentifierMap::default(),
        };
        Ok(Self {
            output_dir: run.output_dir.clone(),
            page_map,
            user_map,
            prefix: run.prefix.clone(),
            inline_fixups: run.inline_fixups,
            exclude_author: run.exclude_author.clone(),
            fixup: run.fixup.clone(),
            fixup_timestamp: unix_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub output_dir: String,
    pub pages_seen: usize,
    pub pages_skipped: usize,
    pub pages_exported: usize,
    pub pages_without_versions: usize,
    pub revisions_written: usize,
    pub fixup_revisions: usize,
    pub attachments_seen: usize,
    pub attachments_copied: usize,
    pub ticket_attachments_skipped: usize,
    pub attachments_skipped: usize,
}

pub fn run_migration<S>(source: &S, settings: &MigrationSettings) -> Result<MigrationReport>
where
    S: SourceStore + ?Sized,
{
    let translator = Translator::new(&settings.page_map, &settings.prefix)?;
    let mut report = MigrationReport {
        output_dir: normalize_path(&settings.output_dir),
        ..MigrationReport::default()
    };

    migrate_pages(source, settings, &translator, &mut report)?;
    migrate_attachments(source, settings, &mut report)?;
    Ok(report)
}

fn migrate_pages<S>(
    source: &S,
    settings: &MigrationSettings,
    translator: &Translator,
    report: &mut MigrationReport,
) -> Result<()>
where
    S: SourceStore + ?Sized,
{
    for name in source.page_names(&settings.exclude_author)? {
        report.pages_seen += 1;
        let Some(new_name) = settings
            .page_map
            .resolve(&name, &settings.prefix, "Converting")
        else {
            report.pages_skipped += 1;
            continue;
        };

        let versions = source
            .page_versions(&name, &settings.exclude_author)
            .with_context(|| format!("failed to load versions of {name}"))?;
        if versions.is_empty() {
            report.pages_without_versions += 1;
            continue;
        }

        let storage_name = normalize_page_name(&new_name);
        let page = PageDirectory::new(&settings.output_dir, &storage_name);
        let mut revision = 0u32;
        let mut last_content = String::new();
        for version in versions {
            revision += 1;
            let author = settings.user_map.translate_user(&version.author);
            info!(
                "  Version {} by {} ({})",
                version.version, version.author, author
            );
            let content = if settings.inline_fixups {
                translator.translate(&version.content)
            } else {
                version.content
            };

            page.write_revision(revision, &content)?;
            page.append_log(&EditLogEntry {
                timestamp: version.timestamp,
                revision,
                page_name: storage_name.clone(),
                address: version.address,
                author,
                comment: version.comment,
                action: EditAction::Save,
            })?;
            report.revisions_written += 1;
            last_content = content;
        }

        if !settings.inline_fixups {
            revision += 1;
            info!("  Fixing Syntax {revision}");
            page.write_revision(revision, &translator.translate(&last_content))?;
            page.append_log(&EditLogEntry {
                timestamp: settings.fixup_timestamp,
                revision,
                page_name: storage_name.clone(),
                address: settings.fixup.address.clone(),
                author: settings.fixup.author.clone(),
                comment: settings.fixup.comment.clone(),
                action: EditAction::Save,
            })?;
            report.revisions_written += 1;
            report.fixup_revisions += 1;
        }
        report.pages_exported += 1;
    }
    Ok(())
}

fn migrate_attachments<S>(
    source: &S,
    settings: &MigrationSettings,
    report: &mut MigrationReport,
) -> Result<()>
where
    S: SourceStore + ?Sized,
{
    for record in source.attachments(&settings.exclude_author)? {
        report.attachments_seen += 1;
        if record.is_ticket_attachment() {
            report.ticket_attachments_skipped += 1;
            continue;
        }
        let label = format!("Converting Attachment '{}'", record.filename);
        let Some(new_name) = settings
            .page_map
            .resolve(&record.id, &settings.prefix, &label)
        else {
            report.attachments_skipped += 1;
            continue;
        };

        let storage_name = normalize_page_name(&new_name);
        let page = PageDirectory::new(&settings.output_dir, &storage_name);
        page.store_attachment(&source.attachment_payload(&record), &record.filename)?;
        page.append_log(&EditLogEntry {
            timestamp: record.timestamp,
            revision: ATTACHMENT_LOG_REVISION,
            page_name: storage_name,
            address: record.address,
            author: settings.user_map.translate_user(&record.author),
            comment: String::new(),
            action: EditAction::AttachmentNew {
                filename: record.filename,
            },
        })?;
        report.attachments_copied += 1;
    }
    Ok(())
}

pub fn unix_timestamp() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is set before unix epoch")?
        .as_secs();
    i64::try_from(seconds).context("timestamp does not fit into i64")
}
