use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

/// Leading marker on a `NEW` value that excludes `OLD` from migration.
pub const SKIP_MARKER: char = '-';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapEntry {
    Excluded,
    Renamed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Unmapped,
    Excluded,
    /// Carries the new name with the prefix already applied.
    Renamed(String),
}

/// Old-to-new rename table for page names or user names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMap {
    entries: BTreeMap<String, MapEntry>,
}

impl IdentifierMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn excluded_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, MapEntry::Excluded))
            .count()
    }

    pub fn get(&self, name: &str) -> Option<&MapEntry> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, old: impl Into<String>, entry: MapEntry) {
        self.entries.insert(old.into(), entry);
    }

    /// Non-excluded `(old, new)` pairs in lexicographic order of the old name.
    pub fn renames(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(old, entry)| match entry {
            MapEntry::Renamed(new) => Some((old.as_str(), new.as_str())),
            MapEntry::Excluded => None,
        })
    }

    pub fn lookup(&self, name: &str, prefix: &str) -> Lookup {
        match self.entries.get(name) {
            None => Lookup::Unmapped,
            Some(MapEntry::Excluded) => Lookup::Excluded,
            Some(MapEntry::Renamed(new)) => Lookup::Renamed(format!("{prefix}{new}")),
        }
    }

    /// Resolve a name for migration, logging the decision for the operator.
    /// Returns `None` when the name must be skipped.
    pub fn resolve(&self, name: &str, prefix: &str, label: &str) -> Option<String> {
        match self.lookup(name, prefix) {
            Lookup::Unmapped => {
                info!("{label} '{name}': Skipping - not in name map");
                None
            }
            Lookup::Excluded => {
                info!("{label} '{name}': Skipping - excluded by name map");
                None
            }
            Lookup::Renamed(new_name) => {
                if new_name != name {
                    info!("{label}: '{name}' to '{new_name}'");
                } else {
                    info!("{label}: '{name}'");
                }
                Some(new_name)
            }
        }
    }

    /// Authors are never dropped: unmapped and excluded users keep their name.
    pub fn translate_user(&self, user: &str) -> String {
        match self.entries.get(user) {
            Some(MapEntry::Renamed(new)) => new.clone(),
            _ => user.to_string(),
        }
    }
}

pub fn load_identifier_map(path: &Path) -> Result<IdentifierMap> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read map file {}", path.display()))?;
    parse_identifier_map(&content, &path.display().to_string())
}

/// Parse `OLD|NEW` lines. Later renames overwrite earlier ones; a skip-marked
/// line only excludes a name that has no rename yet.
pub fn parse_identifier_map(content: &str, origin: &str) -> Result<IdentifierMap> {
    let mut map = IdentifierMap::default();
    for (index, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let line_number = index + 1;
        let mut fields = line.split('|');
        let old = fields.next().unwrap_or_default().trim();
        let Some(new) = fields.next().map(str::trim) else {
            bail!("{origin}:{line_number}: expected OLD|NEW, found `{line}`");
        };
        if old.is_empty() {
            bail!("{origin}:{line_number}: empty old name in `{line}`");
        }
        if new.is_empty() {
            bail!("{origin}:{line_number}: empty new name in `{line}`");
        }
        if new.starts_with(SKIP_MARKER) {
            // A skip line never cancels a rename already read for the same name.
            if !matches!(map.get(old), Some(MapEntry::Renamed(_))) {
                map.insert(old, MapEntry::Excluded);
            }
        } else {
            map.insert(old, MapEntry::Renamed(new.to_string()));
        }
    }
    Ok(map)
}
