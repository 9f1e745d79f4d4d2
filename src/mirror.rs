//! Consumer-facing re-export trees.
//!
//! After renaming, generated modules live under fold-prefixed packages such as
//! `v4_proto/dydx_v4_ns_cosmos/bank/v1/dydx_v4_bank_pb2.py`. Consumers expect
//! the original `v4_proto.cosmos.bank.v1.bank_pb2`. Two strategies restore
//! that surface:
//!
//! - **Static** ([`plan_static`], [`write_static`]): one shim file per internal
//!   leaf module, at the unprefixed location, containing only a wildcard
//!   re-export. Missing `__init__.py` files are created empty; existing ones
//!   are never overwritten.
//! - **Dynamic** ([`write_dynamic`]): one `__init__.py` per public package that
//!   walks the internal package on first attribute access and attaches every
//!   submodule under its unprefixed relative name.
//!
//! Shims are derived output and are regenerated wholesale on every run.

use crate::atomic;
use crate::error::{Error, Result};
use crate::report::{FileReport, FileStatus, StageReport};
use crate::resolver;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const PACKAGE_MARKER: &str = "__init__.py";

/// Whether a module-tree node is an internal (prefixed) or canonical public one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Internal,
    Public,
}

/// A module file and the dotted import path it answers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleNode {
    pub path: PathBuf,
    pub dotted: String,
    pub kind: NodeKind,
}

/// A public module forwarding to an internal one.
///
/// The shim refers to its target by import path only; it neither owns nor
/// keeps alive the internal module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportShim {
    pub public: ModuleNode,
    pub target: ModuleNode,
}

impl ExportShim {
    pub fn content(&self) -> String {
        format!("from {} import *\n", self.target.dotted)
    }
}

/// Everything a static mirror run will write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorPlan {
    pub shims: Vec<ExportShim>,
    /// Package directories that need an `__init__.py`.
    pub packages: Vec<PathBuf>,
}

/// Dotted import path of `file` relative to the directory containing `root`.
fn dotted_module(root: &Path, file: &Path) -> Option<String> {
    let base = root.parent().unwrap_or(Path::new(""));
    let rel = file.strip_prefix(base).ok()?.with_extension("");
    let parts: Vec<&str> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    Some(parts.join("."))
}

/// Walks the internal tree under `root` and plans one shim per leaf module.
///
/// A leaf qualifies when some directory between `root` and the file starts
/// with `fold_prefix` and the file name starts with `file_prefix`. Its public
/// path strips `fold_prefix` from every directory segment that starts with
/// it, and `file_prefix` from the file name.
pub fn plan_static(root: &Path, fold_prefix: &str, file_prefix: &str) -> Result<MirrorPlan> {
    if !root.is_dir() {
        return Err(Error::InputNotFound {
            path: root.to_path_buf(),
        });
    }
    let mut plan = MirrorPlan::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::io(root, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".py") || name == PACKAGE_MARKER || !name.starts_with(file_prefix) {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let dirs: Vec<&str> = rel
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        if fold_prefix.is_empty() || !dirs.iter().any(|d| d.starts_with(fold_prefix)) {
            continue;
        }

        let mut public_rel = PathBuf::new();
        for dir in &dirs {
            public_rel.push(resolver::strip_segment(dir, fold_prefix));
        }
        public_rel.push(resolver::strip_segment(name, file_prefix));
        let public_path = root.join(&public_rel);

        let target = dotted_module(root, path);
        let (Some(target), Some(dotted)) = (target, dotted_module(root, &public_path)) else {
            continue;
        };

        let mut dir = public_path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if !d.starts_with(root) {
                break;
            }
            if !plan.packages.contains(&d) {
                plan.packages.push(d.clone());
            }
            dir = d.parent().map(Path::to_path_buf);
        }

        plan.shims.push(ExportShim {
            public: ModuleNode {
                path: public_path,
                dotted,
                kind: NodeKind::Public,
            },
            target: ModuleNode {
                path: path.to_path_buf(),
                dotted: target,
                kind: NodeKind::Internal,
            },
        });
    }

    plan.packages.sort();
    Ok(plan)
}

/// Writes a static mirror plan. Shims are always rewritten; package markers
/// only when absent.
pub fn write_static(plan: &MirrorPlan, dry_run: bool) -> StageReport {
    let mut report = StageReport::new("mirror");

    for dir in &plan.packages {
        let marker = dir.join(PACKAGE_MARKER);
        if marker.exists() {
            continue;
        }
        let status = if dry_run {
            FileStatus::Changed { changes: 1 }
        } else {
            write_status(&marker, "")
        };
        report.push(FileReport::new(marker, status));
    }

    for shim in &plan.shims {
        let path = &shim.public.path;
        let content = shim.content();
        let status = if std::fs::read_to_string(path).is_ok_and(|existing| existing == content) {
            FileStatus::Unchanged
        } else if dry_run {
            FileStatus::Changed { changes: 1 }
        } else {
            write_status(path, &content)
        };
        tracing::debug!(shim = %path.display(), target = %shim.target.dotted, "re-export");
        report.push(FileReport::new(path, status));
    }

    report
}

fn write_status(path: &Path, content: &str) -> FileStatus {
    match atomic::write(path, content) {
        Ok(()) => FileStatus::Changed { changes: 1 },
        Err(e) => FileStatus::Failed { error: e.to_string() },
    }
}

/// Renders the lazily-attaching public `__init__.py` for one package.
pub fn dynamic_init(root_package: &str, fold_prefix: &str, package: &str) -> String {
    let internal = format!("{}.{}{}", root_package, fold_prefix, package);
    format!(
        r#""""
Public API for the {package} package.

Re-exports {internal} and all of its submodules under their
unprefixed names. The internal tree is walked once, on first attribute access.
"""

import importlib
import pkgutil
import types

_INTERNAL = "{internal}"
_attached = False


def _attach():
    global _attached
    if _attached:
        return
    _attached = True
    internal = importlib.import_module(_INTERNAL)
    namespace = globals()
    for name in dir(internal):
        if not name.startswith("_"):
            namespace.setdefault(name, getattr(internal, name))
    walk = pkgutil.walk_packages(internal.__path__, prefix=_INTERNAL + ".")
    for _finder, modname, _ispkg in walk:
        try:
            module = importlib.import_module(modname)
        except Exception:
            continue
        parts = modname[len(_INTERNAL) + 1:].split(".")
        current = namespace
        for part in parts[:-1]:
            if isinstance(current, dict):
                holder = current.get(part)
            else:
                holder = getattr(current, part, None)
            if holder is None:
                holder = types.ModuleType(part)
                if isinstance(current, dict):
                    current[part] = holder
                else:
                    setattr(current, part, holder)
            current = holder
        if isinstance(current, dict):
            current[parts[-1]] = module
        else:
            setattr(current, parts[-1], module)


def __getattr__(name):
    _attach()
    try:
        return globals()[name]
    except KeyError:
        raise AttributeError(name) from None


def __dir__():
    _attach()
    return sorted(name for name in globals() if not name.startswith("_"))
"#
    )
}

/// Writes `<base>/__init__.py` (if absent) and `<base>/<pkg>/__init__.py` for
/// each package using the dynamic strategy.
pub fn write_dynamic(
    base: &Path,
    fold_prefix: &str,
    packages: &[String],
    dry_run: bool,
) -> Result<StageReport> {
    let root_package = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InputNotFound {
            path: base.to_path_buf(),
        })?;
    let mut report = StageReport::new("public-api");

    let base_init = base.join(PACKAGE_MARKER);
    if !base_init.exists() {
        let status = if dry_run {
            FileStatus::Changed { changes: 1 }
        } else {
            write_status(&base_init, "")
        };
        report.push(FileReport::new(base_init, status));
    }

    for package in packages {
        let init = base.join(package.replace('.', "/")).join(PACKAGE_MARKER);
        let content = dynamic_init(root_package, fold_prefix, package);
        let status = if dry_run {
            FileStatus::Changed { changes: 1 }
        } else {
            write_status(&init, &content)
        };
        report.push(FileReport::new(init, status));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn plans_one_shim_per_internal_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("v4_proto");
        touch(&root, "dydx_v4_ns_cosmos/__init__.py", "");
        touch(&root, "dydx_v4_ns_cosmos/bank/v1/dydx_v4_bank_pb2.py", "");
        touch(&root, "dydx_v4_ns_cosmos/bank/v1/dydx_v4_tx_pb2.py", "");
        touch(&root, "dydx_v4_ns_cosmos/bank/v1/notes.txt", "");
        touch(&root, "dydx_v4_ns_cosmos/bank/v1/helper.py", "");
        touch(&root, "dydxprotocol/dydx_v4_clob_pb2.py", "");

        let plan = plan_static(&root, "dydx_v4_ns_", "dydx_v4_").unwrap();
        let shims: Vec<_> = plan
            .shims
            .iter()
            .map(|s| (s.public.dotted.as_str(), s.target.dotted.as_str()))
            .collect();
        assert_eq!(
            shims,
            vec![
                (
                    "v4_proto.cosmos.bank.v1.bank_pb2",
                    "v4_proto.dydx_v4_ns_cosmos.bank.v1.dydx_v4_bank_pb2"
                ),
                (
                    "v4_proto.cosmos.bank.v1.tx_pb2",
                    "v4_proto.dydx_v4_ns_cosmos.bank.v1.dydx_v4_tx_pb2"
                ),
            ]
        );
        assert!(plan.shims.iter().all(|s| s.public.kind == NodeKind::Public));
        assert!(plan.shims.iter().all(|s| s.target.kind == NodeKind::Internal));
        assert_eq!(
            plan.shims[0].target.path,
            root.join("dydx_v4_ns_cosmos/bank/v1/dydx_v4_bank_pb2.py")
        );
        assert_eq!(
            plan.packages,
            vec![
                root.clone(),
                root.join("cosmos"),
                root.join("cosmos/bank"),
                root.join("cosmos/bank/v1"),
            ]
        );
    }

    #[test]
    fn prefix_is_stripped_only_at_segment_start() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        touch(&root, "ns_a/keep_ns_b/p_mod_p_pb2.py", "");
        let plan = plan_static(&root, "ns_", "p_").unwrap();
        assert_eq!(plan.shims[0].public.dotted, "pkg.a.keep_ns_b.mod_p_pb2");
    }

    #[test]
    fn write_static_keeps_existing_init_and_is_rerunnable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("v4_proto");
        touch(&root, "dydx_v4_ns_amino/dydx_v4_amino_pb2.py", "");
        touch(&root, "amino/__init__.py", "# hand written\n");

        let plan = plan_static(&root, "dydx_v4_ns_", "dydx_v4_").unwrap();
        let report = write_static(&plan, false);
        assert!(!report.has_failures());

        assert_eq!(
            fs::read_to_string(root.join("amino/__init__.py")).unwrap(),
            "# hand written\n"
        );
        assert_eq!(fs::read_to_string(root.join("__init__.py")).unwrap(), "");
        assert_eq!(
            fs::read_to_string(root.join("amino/amino_pb2.py")).unwrap(),
            "from v4_proto.dydx_v4_ns_amino.dydx_v4_amino_pb2 import *\n"
        );

        let again = write_static(&plan_static(&root, "dydx_v4_ns_", "dydx_v4_").unwrap(), false);
        assert_eq!(again.diagnostics.files_changed, 0);
        assert_eq!(again.diagnostics.files_unchanged, 1);
    }

    #[test]
    fn missing_root_is_input_not_found() {
        let err = plan_static(Path::new("/no/such/tree"), "ns_", "p_").unwrap_err();
        assert!(matches!(err, Error::InputNotFound { .. }));
    }

    #[test]
    fn dynamic_init_points_at_internal_package() {
        let text = dynamic_init("v4_proto", "dydx_v4_ns_", "cosmos");
        assert!(text.contains("_INTERNAL = \"v4_proto.dydx_v4_ns_cosmos\"\n"));
        assert!(text.contains("def __getattr__(name):"));
    }

    #[test]
    fn write_dynamic_creates_package_inits() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("v4_proto");
        let packages = ["amino".to_string(), "cosmos".to_string()];
        let report = write_dynamic(&base, "dydx_v4_ns_", &packages, false).unwrap();
        assert_eq!(report.diagnostics.files_changed, 3);
        assert!(base.join("__init__.py").exists());
        let amino = fs::read_to_string(base.join("amino/__init__.py")).unwrap();
        assert!(amino.contains("v4_proto.dydx_v4_ns_amino"));
    }
}
