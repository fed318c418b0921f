use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, OpenFlags, Row, params};
use tracing::warn;

/// Author Trac uses for the pages it ships with.
pub const DEFAULT_SYSTEM_AUTHOR: &str = "trac";

/// Trac 0.12 and later store microseconds; no second-based value gets this large.
const MICROSECOND_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVersion {
    pub version: i64,
    pub content: String,
    pub timestamp: i64,
    pub author: String,
    pub address: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub id: String,
    pub filename: String,
    pub timestamp: i64,
    pub author: String,
    pub address: String,
}

impl AttachmentRecord {
    /// Ticket attachments are keyed by the numeric ticket id.
    pub fn is_ticket_attachment(&self) -> bool {
        !self.id.is_empty() && self.id.bytes().all(|byte| byte.is_ascii_digit())
    }
}

/// Read-only view of the source wiki.
pub trait SourceStore {
    /// Distinct page names with at least one version not written by `exclude_author`.
    fn page_names(&self, exclude_author: &str) -> Result<Vec<String>>;

    /// Versions of one page in ascending version order.
    fn page_versions(&self, name: &str, exclude_author: &str) -> Result<Vec<PageVersion>>;

    /// Attachment records in ascending upload time.
    fn attachments(&self, exclude_author: &str) -> Result<Vec<AttachmentRecord>>;

    /// Location of the stored payload for an attachment.
    fn attachment_payload(&self, record: &AttachmentRecord) -> PathBuf;
}

/// A Trac project environment backed by its SQLite database.
pub struct TracDatabase {
    connection: Connection,
    attachments_root: PathBuf,
    has_address_column: bool,
}

impl TracDatabase {
    pub fn open(project_root: &Path) -> Result<Self> {
        let db_path = project_root.join("db").join("trac.db");
        if !db_path.exists() {
            bail!(
                "Trac database not found at {} (is {} a Trac environment?)",
                db_path.display(),
                project_root.display()
            );
        }
        let connection = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        Self::from_connection(connection, project_root.join("attachments"))
    }

    pub fn from_connection(connection: Connection, attachments_root: PathBuf) -> Result<Self> {
        let has_address_column = column_exists(&connection, "wiki", "ipnr")?;
        Ok(Self {
            connection,
            attachments_root,
            has_address_column,
        })
    }

    fn address_column(&self) -> &'static str {
        if self.has_address_column {
            "ipnr"
        } else {
            "''"
        }
    }
}

impl SourceStore for TracDatabase {
    fn page_names(&self, exclude_author: &str) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT name FROM wiki WHERE author != ?1 GROUP BY name ORDER BY name")
            .context("failed to prepare wiki page name query")?;
        let rows = statement
            .query_map(params![exclude_author], |row| text_lossy(row, 0))
            .context("failed to run wiki page name query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode wiki page name row")?);
        }
        Ok(out)
    }

    fn page_versions(&self, name: &str, exclude_author: &str) -> Result<Vec<PageVersion>> {
        let sql = format!(
            "SELECT version, text, time, author, {}, comment
             FROM wiki
             WHERE name = ?1 AND author != ?2
             ORDER BY version ASC",
            self.address_column()
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare wiki version query")?;
        let rows = statement
            .query_map(params![name, exclude_author], |row| {
                Ok(PageVersion {
                    version: row.get(0)?,
                    content: text_lossy(row, 1)?,
                    timestamp: timestamp_seconds(row, 2)?,
                    author: text_lossy(row, 3)?,
                    address: text_lossy(row, 4)?,
                    comment: text_lossy(row, 5)?,
                })
            })
            .with_context(|| format!("failed to run wiki version query for {name}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.with_context(|| format!("failed to decode wiki version of {name}"))?);
        }
        Ok(out)
    }

    fn attachments(&self, exclude_author: &str) -> Result<Vec<AttachmentRecord>> {
        let address = if column_exists(&self.connection, "attachment", "ipnr")? {
            "ipnr"
        } else {
            "''"
        };
        let sql = format!(
            "SELECT id, filename, time, author, {address}
             FROM attachment
             WHERE author != ?1
             ORDER BY time ASC"
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare attachment query")?;
        let rows = statement
            .query_map(params![exclude_author], |row| {
                Ok(AttachmentRecord {
                    id: text_lossy(row, 0)?,
                    filename: text_lossy(row, 1)?,
                    timestamp: timestamp_seconds(row, 2)?,
                    author: text_lossy(row, 3)?,
                    address: text_lossy(row, 4)?,
                })
            })
            .context("failed to run attachment query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode attachment row")?);
        }
        Ok(out)
    }

    fn attachment_payload(&self, record: &AttachmentRecord) -> PathBuf {
        self.attachments_root
            .join("wiki")
            .join(&record.id)
            .join(&record.filename)
    }
}

fn column_exists(connection: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut statement = connection
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table {table}"))?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("failed to read columns of {table}"))?;
    for name in names {
        if name.with_context(|| format!("failed to decode column of {table}"))? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Trac text columns are nullable and not always valid UTF-8.
fn text_lossy(row: &Row<'_>, index: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null => String::new(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        ValueRef::Integer(value) => value.to_string(),
        ValueRef::Real(value) => value.to_string(),
    })
}

fn timestamp_seconds(row: &Row<'_>, index: usize) -> rusqlite::Result<i64> {
    let raw = match row.get_ref(index)? {
        ValueRef::Integer(value) => value,
        ValueRef::Real(value) => value as i64,
        ValueRef::Null => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                index,
                Type::Null,
                "timestamp is NULL".into(),
            ));
        }
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes)
            .trim()
            .parse::<f64>()
            .map(|value| value as i64)
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
            })?,
    };
    Ok(normalize_timestamp(raw))
}

pub fn normalize_timestamp(raw: i64) -> i64 {
    if raw > MICROSECOND_THRESHOLD {
        raw / 1_000_000
    } else {
        if raw < 0 {
            warn!("negative source timestamp {raw}");
        }
        raw
    }
}
