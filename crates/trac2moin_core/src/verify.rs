use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use walkdir::WalkDir;

use crate::export::ATTACHMENT_LOG_REVISION;
use crate::filesystem::{
    ATTACHMENTS_DIR, CURRENT_FILE, EDIT_LOG_FILE, REVISIONS_DIR, normalize_path, parse_revision,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerifyIssue {
    pub page: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub output_dir: String,
    pub pages: usize,
    pub revisions: usize,
    pub attachments: usize,
    pub log_entries: usize,
    pub issues: Vec<VerifyIssue>,
}

/// Check an exported page store against the layout the exporter promises.
pub fn verify_output(output_root: &Path) -> Result<VerifyReport> {
    if !output_root.is_dir() {
        bail!("output directory not found: {}", normalize_path(output_root));
    }
    let mut report = VerifyReport {
        output_dir: normalize_path(output_root),
        ..VerifyReport::default()
    };

    for entry in WalkDir::new(output_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry
            .with_context(|| format!("failed to scan {}", normalize_path(output_root)))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        report.pages += 1;
        let page = entry.file_name().to_string_lossy().into_owned();
        verify_page(entry.path(), &page, &mut report)?;
    }
    Ok(report)
}

fn verify_page(page_dir: &Path, page: &str, report: &mut VerifyReport) -> Result<()> {
    let mut issue = |message: String| {
        report.issues.push(VerifyIssue {
            page: page.to_string(),
            message,
        })
    };

    let mut revisions = BTreeSet::new();
    for name in list_files(&page_dir.join(REVISIONS_DIR))? {
        match parse_revision(&name) {
            Some(revision) if name.len() == 8 => {
                revisions.insert(revision);
            }
            _ => issue(format!("unexpected revision file name `{name}`")),
        }
    }
    let revision_count = revisions.len();
    if let Some(&highest) = revisions.last() {
        if usize::try_from(highest).ok() != Some(revision_count) || revisions.first() != Some(&1) {
            issue(format!(
                "revisions are not contiguous from 1 ({revision_count} files, highest {highest})"
            ));
        }
    }

    let current_path = page_dir.join(CURRENT_FILE);
    if current_path.exists() {
        let raw = fs::read_to_string(&current_path)
            .with_context(|| format!("failed to read {}", current_path.display()))?;
        match parse_revision(&raw) {
            Some(current) if Some(&current) == revisions.last() => {}
            Some(current) => issue(format!(
                "current points at {current:08} but highest revision is {}",
                revisions
                    .last()
                    .map(|highest| format!("{highest:08}"))
                    .unwrap_or_else(|| "<none>".to_string())
            )),
            None => issue(format!("current is not a revision number: {:?}", raw.trim_end())),
        }
    } else if !revisions.is_empty() {
        issue("revisions exist but current is missing".to_string());
    }

    let attachments: BTreeSet<String> = list_files(&page_dir.join(ATTACHMENTS_DIR))?
        .into_iter()
        .collect();

    let log_path = page_dir.join(EDIT_LOG_FILE);
    let mut log_entries = 0usize;
    if log_path.exists() {
        let content = fs::read_to_string(&log_path)
            .with_context(|| format!("failed to read {}", log_path.display()))?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.windows(2).any(|pair| pair[0] > pair[1]) {
            issue("edit-log is not sorted".to_string());
        }
        for (index, line) in lines.iter().enumerate() {
            log_entries += 1;
            if let Err(message) = check_log_line(line, &revisions, &attachments) {
                issue(format!("edit-log line {}: {message}", index + 1));
            }
        }
    }

    report.revisions += revision_count;
    report.attachments += attachments.len();
    report.log_entries += log_entries;
    Ok(())
}

fn check_log_line(
    line: &str,
    revisions: &BTreeSet<u32>,
    attachments: &BTreeSet<String>,
) -> std::result::Result<(), String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 7 {
        return Err(format!("expected at least 7 fields, found {}", fields.len()));
    }
    if fields[0].is_empty() || !fields[0].bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(format!("timestamp `{}` is not numeric", fields[0]));
    }
    let revision =
        parse_revision(fields[1]).ok_or_else(|| format!("revision `{}` is invalid", fields[1]))?;
    match fields[2] {
        "SAVE" => {
            if revision == ATTACHMENT_LOG_REVISION {
                return Err("SAVE entry uses the attachment revision".to_string());
            }
            if !revisions.contains(&revision) {
                return Err(format!("SAVE entry for missing revision {revision:08}"));
            }
        }
        "ATTNEW" => {
            if revision != ATTACHMENT_LOG_REVISION {
                return Err(format!(
                    "ATTNEW entry uses revision {revision:08} instead of {ATTACHMENT_LOG_REVISION}"
                ));
            }
            let filename = fields
                .get(7)
                .ok_or_else(|| "ATTNEW entry has no filename".to_string())?;
            if !attachments.contains(*filename) {
                return Err(format!("ATTNEW entry for missing attachment `{filename}`"));
            }
        }
        other => return Err(format!("unknown action `{other}`")),
    }
    Ok(())
}

fn list_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to scan {}", normalize_path(dir)))?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
