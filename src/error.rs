//! Error taxonomy for the isolation pipeline.
//!
//! "Pattern not found" is not an error: a missing rewritable construct
//! is an outcome ([`crate::report::FileStatus::NoMatch`]).

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required file or directory does not exist.
    #[error("input not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    /// A registry merge found `key` already mapped to a different value.
    #[error(
        "mapping conflict for '{key}': registry has '{existing}', {} wants '{incoming}'",
        source_file.display()
    )]
    MappingConflict {
        key: String,
        existing: String,
        incoming: String,
        source_file: PathBuf,
    },

    /// The embedded descriptor bytes could not be decoded or re-encoded faithfully.
    #[error("malformed descriptor in {}: {reason}", path.display())]
    MalformedDescriptor { path: PathBuf, reason: String },

    /// The persisted mapping exists but is not a flat string table.
    #[error("malformed registry {}: {reason}", path.display())]
    MalformedRegistry { path: PathBuf, reason: String },

    #[error("timed out waiting for registry lock {}", path.display())]
    LockTimeout { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::InputNotFound { path }
        } else {
            Error::Io { path, source }
        }
    }

    /// True for errors that corrupt shared state and must abort the whole invocation.
    ///
    /// Everything else is scoped to one file: tree passes report it and move on.
    pub fn is_global(&self) -> bool {
        matches!(self, Error::MappingConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_io_becomes_input_not_found() {
        let err = Error::io(
            "missing.proto",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, Error::InputNotFound { .. }));
        assert!(!err.is_global());
    }

    #[test]
    fn only_conflicts_are_global() {
        let conflict = Error::MappingConflict {
            key: "a".into(),
            existing: "b".into(),
            incoming: "c".into(),
            source_file: PathBuf::from("x.proto"),
        };
        assert!(conflict.is_global());
        assert!(conflict.to_string().contains("'a'"));

        let malformed = Error::MalformedDescriptor {
            path: PathBuf::from("x_pb2.py"),
            reason: "truncated".into(),
        };
        assert!(!malformed.is_global());
    }
}
