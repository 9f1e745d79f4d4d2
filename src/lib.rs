//! proto-isolate: move a vendored protobuf schema tree into its own namespace.
//!
//! Two copies of the same schema cannot share one process-wide descriptor
//! pool. This library renames a vendored tree under deterministic prefixes and
//! keeps every artifact consistent with that rename:
//!
//! 1. **Source rewriting** ([`source`]): package declarations, extension
//!    fields, qualified references and import paths in `.proto` text
//! 2. **Registry** ([`registry`]): the persisted old-to-new mapping of
//!    extension names, merged under a lock and never silently overwritten
//! 3. **Reference rewriting** ([`rewriter`]): the whole mapping applied to
//!    every schema file in a tree
//! 4. **Descriptor patching** ([`descriptor`]): a marker option stamped into
//!    each serialized descriptor in generated code
//! 5. **Export mirror** ([`mirror`]): re-export shims restoring the original
//!    import paths
//!
//! Every stage is idempotent; running the pipeline twice produces no diff.
//!
//! # Example
//!
//! ```no_run
//! use proto_isolate::config::{PackageSet, Prefixes};
//! use proto_isolate::registry::ExtensionRegistry;
//! use proto_isolate::rewriter::ReferenceRewriter;
//! use proto_isolate::scanner::Filter;
//! use proto_isolate::source::{self, SourceRewriter};
//! use std::path::PathBuf;
//!
//! let prefixes = Prefixes::new("dydx_v4_", "dydx_v4_ns_");
//! let packages = PackageSet::parse_list("cosmos,amino,google");
//! let store = ExtensionRegistry::new("mapping.json");
//! let roots = vec![PathBuf::from("proto")];
//!
//! // Rename the tree and record the extension renames
//! let rewriter = SourceRewriter::new(&prefixes, &packages);
//! let filter = Filter::default();
//! let (report, _) = source::rewrite_tree(&rewriter, &roots, &filter, &store, false).unwrap();
//!
//! // Propagate every recorded rename to all references
//! let mapping = store.load().unwrap();
//! let refs = ReferenceRewriter::new(&mapping, None);
//! refs.rewrite_tree(&roots, &filter, false, |_| true).unwrap();
//!
//! println!("{} files rewritten", report.diagnostics.files_changed);
//! ```

pub mod atomic;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod literal;
pub mod mirror;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod rewriter;
pub mod scanner;
pub mod source;

// Re-export commonly used types at crate root
pub use config::{PackageSet, Prefixes};
pub use error::{Error, Result};
pub use registry::{ExtensionRegistry, Mapping, RenameEntry};
pub use report::{FileReport, FileStatus, StageReport};
