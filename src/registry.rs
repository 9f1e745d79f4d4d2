//! The persisted extension mapping.
//!
//! A flat JSON object of old qualified name to new qualified name, written with
//! sorted keys and two-space indentation so it diffs cleanly. The store only
//! grows: merging a delta that contradicts an existing entry is a
//! [`Error::MappingConflict`], never an overwrite.
//!
//! Keys and values are normalised before comparison: one pair of surrounding
//! parentheses and a leading `.` are dropped, so `(amino.name)`, `.amino.name`
//! and `amino.name` all name the same entry.

use crate::atomic::{self, FileLock};
use crate::error::{Error, Result};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One old -> new rename, with the schema file that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameEntry {
    pub old: String,
    pub new: String,
    pub source: PathBuf,
}

impl RenameEntry {
    pub fn new(old: impl Into<String>, new: impl Into<String>, source: impl AsRef<Path>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            source: source.as_ref().to_path_buf(),
        }
    }
}

/// Strips reference decoration so equivalent spellings share one key.
pub fn normalize(name: &str) -> &str {
    let name = name.trim();
    let name = name
        .strip_prefix('(')
        .and_then(|n| n.strip_suffix(')'))
        .unwrap_or(name);
    name.strip_prefix('.').unwrap_or(name)
}

/// In-memory view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Mapping(BTreeMap<String, String>);

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.0.get(normalize(old)).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Follows `old` through the mapping until it reaches a name that is not
    /// itself a key. Returns `None` if `old` is unmapped or the chain loops.
    pub fn resolve(&self, old: &str) -> Option<&str> {
        let mut current = self.0.get_key_value(normalize(old))?.1.as_str();
        let mut hops = 0;
        while let Some(next) = self.0.get(current) {
            hops += 1;
            if hops > self.0.len() {
                return None;
            }
            current = next;
        }
        Some(current)
    }

    /// Renders the mapping grouped by package, like a tree.
    pub fn print(&self) {
        let mut groups: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (old, new) in self.iter() {
            let package = old.rsplit_once('.').map_or("", |(pkg, _)| pkg);
            groups.entry(package).or_default().push((old, new));
        }
        for (package, entries) in groups {
            println!("{}", if package.is_empty() { "<root>" } else { package });
            for (old, new) in entries {
                let leaf = old.rsplit('.').next().unwrap_or(old);
                println!("  {} {} {}", leaf.dimmed(), "->".green(), new);
            }
        }
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Mapping(
            iter.into_iter()
                .map(|(k, v)| {
                    let key = normalize(k.as_ref()).to_string();
                    (key, normalize(v.as_ref()).to_string())
                })
                .collect(),
        )
    }
}

/// Counts from one merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub added: usize,
    pub unchanged: usize,
}

/// Merges `deltas` into `existing`.
///
/// A delta whose key is already present with the same value is a no-op; with a
/// different value it is a conflict. Deltas are checked against each other as
/// well as against `existing`. On conflict nothing is returned, so a caller
/// cannot persist a partial merge.
pub fn merge(existing: &Mapping, deltas: &[RenameEntry]) -> Result<(Mapping, MergeSummary)> {
    let mut merged = existing.clone();
    let mut summary = MergeSummary::default();

    for delta in deltas {
        let key = normalize(&delta.old);
        let value = normalize(&delta.new);
        if key == value {
            continue;
        }
        match merged.0.get(key) {
            Some(current) if current == value => summary.unchanged += 1,
            Some(current) => {
                return Err(Error::MappingConflict {
                    key: key.to_string(),
                    existing: current.clone(),
                    incoming: value.to_string(),
                    source_file: delta.source.clone(),
                });
            }
            None => {
                merged.0.insert(key.to_string(), value.to_string());
                summary.added += 1;
            }
        }
    }

    Ok((merged, summary))
}

/// Handle on the mapping file.
#[derive(Debug, Clone)]
pub struct ExtensionRegistry {
    path: PathBuf,
    lock_timeout: Duration,
}

impl ExtensionRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: FileLock::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the mapping. A missing file is an empty mapping, not an error.
    pub fn load(&self) -> Result<Mapping> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no registry yet, starting empty");
                return Ok(Mapping::new());
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(Mapping::new());
        }
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&text).map_err(|e| Error::MalformedRegistry {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(raw.into_iter().collect())
    }

    /// Writes the full mapping atomically.
    pub fn persist(&self, mapping: &Mapping) -> Result<()> {
        let mut json = serde_json::to_string_pretty(mapping).map_err(|e| Error::MalformedRegistry {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        json.push('\n');
        atomic::write(&self.path, json)
    }

    /// Load, merge and persist as one exclusive acquisition of the registry.
    ///
    /// Nothing is written when the merge conflicts or adds no entries.
    pub fn update(&self, deltas: &[RenameEntry]) -> Result<(Mapping, MergeSummary)> {
        let _lock = FileLock::acquire(&self.path, self.lock_timeout)?;
        let existing = self.load()?;
        let (merged, summary) = merge(&existing, deltas)?;
        if summary.added > 0 {
            self.persist(&merged)?;
            tracing::info!(
                path = %self.path.display(),
                added = summary.added,
                total = merged.len(),
                "registry updated"
            );
        }
        Ok((merged, summary))
    }
}
