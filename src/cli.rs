//! Command-line interface definitions.
//!
//! One subcommand per pipeline stage, plus `pipeline` for the source and
//! reference stages together and a few read-only views. Prefixes and the
//! mapping path can also come from the environment.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use proto_isolate::descriptor::{DEFAULT_MARKER_NAMESPACE, PatchMode};
use std::path::PathBuf;

/// Isolate a vendored protobuf schema tree under its own namespace.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Log per-file detail to stderr (`RUST_LOG` overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON reports instead of human-readable output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct PrefixArgs {
    /// Prefix for package names and extension-field identifiers.
    #[arg(long, env = "PROTO_ISOLATE_FILE_PREFIX")]
    pub file_prefix: String,

    /// Prefix for folder segments and import paths.
    #[arg(long, env = "PROTO_ISOLATE_FOLD_PREFIX")]
    pub fold_prefix: String,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct FilterArgs {
    /// Glob patterns for directories/files to exclude (e.g., "third_party",
    /// "*_test.proto"). By default, entries starting with `.` or `_` are excluded.
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Disable default exclusion of `.` and `_` prefixed entries.
    #[arg(long)]
    pub no_default_excludes: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Rename packages, extension fields and paths in schema files and record
    /// the extension renames in the mapping.
    RewriteSource {
        /// Schema files or directories to rewrite in place.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Write the result here instead of in place (single input file only).
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        prefixes: PrefixArgs,

        /// Vendored packages to rename, comma-separated or repeated.
        #[arg(long, value_delimiter = ',')]
        packages: Vec<String>,

        /// Path of the persisted extension mapping.
        #[arg(long, env = "PROTO_ISOLATE_MAPPING")]
        mapping: PathBuf,

        /// Seconds to wait for another run to release the mapping lock.
        #[arg(long, default_value_t = 30)]
        lock_timeout: u64,

        #[command(flatten)]
        filter: FilterArgs,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply the persisted mapping to every schema file in a tree.
    RewriteRefs {
        /// Root of the schema tree.
        #[arg(long)]
        dir: PathBuf,

        /// Path of the persisted extension mapping.
        #[arg(long, env = "PROTO_ISOLATE_MAPPING")]
        mapping: PathBuf,

        /// A prefix that may already be glued onto an old name and should be
        /// consumed by the match.
        #[arg(long)]
        prefix: Option<String>,

        /// Interactively confirm each file's changes before applying.
        #[arg(short, long)]
        interactive: bool,

        #[command(flatten)]
        filter: FilterArgs,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Rewrite sources, merge the mapping and rewrite references in one run.
    Pipeline {
        /// Root of the schema tree.
        #[arg(long)]
        dir: PathBuf,

        #[command(flatten)]
        prefixes: PrefixArgs,

        /// Vendored packages to rename, comma-separated or repeated.
        #[arg(long, value_delimiter = ',', required = true)]
        packages: Vec<String>,

        /// Path of the persisted extension mapping.
        #[arg(long, env = "PROTO_ISOLATE_MAPPING")]
        mapping: PathBuf,

        /// Seconds to wait for another run to release the mapping lock.
        #[arg(long, default_value_t = 30)]
        lock_timeout: u64,

        #[command(flatten)]
        filter: FilterArgs,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Stamp the marker option into descriptors embedded in generated `_pb2.py` files.
    PatchDescriptor {
        /// Generated files or directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// How the patched registration is written back.
        #[arg(long, value_enum, default_value_t = Mode::Runtime)]
        mode: Mode,

        /// Namespace of the marker option name and value.
        #[arg(long, default_value = DEFAULT_MARKER_NAMESPACE)]
        marker_namespace: String,

        #[command(flatten)]
        filter: FilterArgs,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the descriptor embedded in one generated file.
    Inspect {
        file: PathBuf,

        /// Namespace of the marker to look for.
        #[arg(long, default_value = DEFAULT_MARKER_NAMESPACE)]
        marker_namespace: String,
    },

    /// Write re-export shims restoring unprefixed module paths.
    Mirror {
        /// Root of the generated package tree.
        #[arg(long)]
        source: PathBuf,

        #[command(flatten)]
        prefixes: PrefixArgs,

        /// Report what would be written without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate lazily-attaching public `__init__.py` files.
    PublicApi {
        /// Top-level vendored packages to expose.
        #[arg(required = true)]
        packages: Vec<String>,

        /// Directory of the root Python package.
        #[arg(long)]
        base_dir: PathBuf,

        /// Prefix of the internal package directories.
        #[arg(long, env = "PROTO_ISOLATE_FOLD_PREFIX")]
        fold_prefix: String,

        /// Report what would be written without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the persisted mapping grouped by package.
    Registry {
        /// Path of the persisted extension mapping.
        #[arg(long, env = "PROTO_ISOLATE_MAPPING")]
        mapping: PathBuf,
    },

    /// List schema files that would be processed without processing them.
    Scan {
        /// Paths to scan. Defaults to current directory.
        #[arg(short, long)]
        paths: Option<Vec<PathBuf>>,

        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Patch at import time.
    Runtime,
    /// Embed the patched bytes.
    Inline,
}

impl From<Mode> for PatchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Runtime => PatchMode::Runtime,
            Mode::Inline => PatchMode::Inline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_package_lists_both_ways() {
        let args = Args::try_parse_from([
            "proto-isolate",
            "rewrite-source",
            "proto",
            "--file-prefix",
            "dydx_v4_",
            "--fold-prefix",
            "dydx_v4_ns_",
            "--packages",
            "cosmos,amino",
            "--packages",
            "google",
            "--mapping",
            "mapping.json",
        ])
        .unwrap();
        match args.command {
            Commands::RewriteSource {
                packages,
                lock_timeout,
                ..
            } => {
                assert_eq!(packages, ["cosmos", "amino", "google"]);
                assert_eq!(lock_timeout, 30);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pipeline_accepts_lock_timeout() {
        let args = Args::try_parse_from([
            "proto-isolate",
            "pipeline",
            "--dir",
            "proto",
            "--file-prefix",
            "dydx_v4_",
            "--fold-prefix",
            "dydx_v4_ns_",
            "--packages",
            "amino",
            "--mapping",
            "mapping.json",
            "--lock-timeout",
            "5",
        ])
        .unwrap();
        match args.command {
            Commands::Pipeline { lock_timeout, .. } => assert_eq!(lock_timeout, 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let argv = ["proto-isolate", "registry", "--mapping", "m.json", "--json", "-v"];
        let args = Args::try_parse_from(argv).unwrap();
        assert!(args.json);
        assert!(args.verbose);
    }

    #[test]
    fn patch_mode_defaults_to_runtime() {
        let args = Args::try_parse_from(["proto-isolate", "patch-descriptor", "gen"]).unwrap();
        match args.command {
            Commands::PatchDescriptor {
                mode,
                marker_namespace,
                ..
            } => {
                assert_eq!(PatchMode::from(mode), PatchMode::Runtime);
                assert_eq!(marker_namespace, "dydx_v4_");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
