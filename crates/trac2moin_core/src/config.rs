use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "trac2moin.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "moin";
pub const DEFAULT_FIXUP_AUTHOR: &str = "trac2moin";
pub const DEFAULT_FIXUP_COMMENT: &str = "Fix wiki syntax after Trac import";
pub const DEFAULT_FIXUP_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConverterConfig {
    #[serde(default)]
    pub migration: MigrationSection,
    #[serde(default)]
    pub fixup: FixupSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    pub trac: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub namemap: Option<PathBuf>,
    pub usermap: Option<PathBuf>,
    pub prefix: Option<String>,
    pub inline_fixups: Option<bool>,
    pub exclude_author: Option<String>,
}

/// Attribution for the synthetic revision that carries translated markup.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FixupSection {
    pub author: Option<String>,
    pub comment: Option<String>,
    pub address: Option<String>,
}

impl FixupSection {
    pub fn author(&self) -> &str {
        non_empty(self.author.as_deref()).unwrap_or(DEFAULT_FIXUP_AUTHOR)
    }

    pub fn comment(&self) -> &str {
        non_empty(self.comment.as_deref()).unwrap_or(DEFAULT_FIXUP_COMMENT)
    }

    pub fn address(&self) -> &str {
        non_empty(self.address.as_deref()).unwrap_or(DEFAULT_FIXUP_ADDRESS)
    }
}

/// Load and parse the converter config. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ConverterConfig> {
    if !config_path.exists() {
        return Ok(ConverterConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ConverterConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
