//! Schema and generated-code file discovery.
//!
//! Recursively walks directories collecting files of one [`FileKind`],
//! skipping entries whose names start with `.` or `_` unless told otherwise,
//! plus any entry matching a user-supplied glob. Results are sorted so that
//! every pass visits files in the same order.

use crate::error::{Error, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The artifact kinds the pipeline operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Schema source, `*.proto`.
    Schema,
    /// Compiler output carrying an embedded descriptor, `*_pb2.py`.
    Generated,
}

impl FileKind {
    pub fn matches(self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        match self {
            FileKind::Schema => name.ends_with(".proto"),
            FileKind::Generated => name.ends_with("_pb2.py"),
        }
    }
}

/// Entry-name filtering applied during the walk.
#[derive(Debug, Clone)]
pub struct Filter {
    patterns: Vec<Pattern>,
    default_excludes: bool,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            default_excludes: true,
        }
    }
}

impl Filter {
    /// Compiles `exclude` globs. Invalid patterns are reported and ignored.
    pub fn new(exclude: &[String], default_excludes: bool) -> Self {
        let patterns = exclude
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(pattern = %raw, error = %e, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        Self {
            patterns,
            default_excludes,
        }
    }

    fn excludes(&self, entry: &walkdir::DirEntry) -> bool {
        // The walk roots themselves are never filtered.
        if entry.depth() == 0 {
            return false;
        }
        let Some(name) = entry.file_name().to_str() else {
            return false;
        };
        if self.default_excludes && (name.starts_with('.') || name.starts_with('_')) {
            return true;
        }
        self.patterns.iter().any(|p| p.matches(name))
    }
}

/// Collects all files of `kind` under `paths`, sorted and deduplicated.
///
/// A path naming a file is included as-is when it has the right kind. A path
/// that does not exist is an [`Error::InputNotFound`].
pub fn collect_files(paths: &[PathBuf], kind: FileKind, filter: &Filter) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(Error::InputNotFound { path: path.clone() });
        }
        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !filter.excludes(e))
        {
            let entry = entry.map_err(|e| {
                let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
                Error::io(at, e.into())
            })?;
            if entry.file_type().is_file() && kind.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}
