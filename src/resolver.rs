//! Idempotent prefix application for names and paths.
//!
//! Every rule here asks a single question before renaming: does the target
//! segment already start with the prefix? That test is textual. A segment that
//! happens to begin with the prefix text but was never renamed by this tool is
//! left alone as well; callers cannot distinguish the two cases.

use std::borrow::Cow;

/// Which part of a qualified name a prefix attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// Prefix the last segment: `amino.name` -> `amino.dydx_v4_name`.
    Field,
    /// Prefix the whole name: `cosmos.bank.v1` -> `dydx_v4_cosmos.bank.v1`.
    Package,
}

/// Plain string-prefix test used as the idempotence guard.
pub fn is_prefixed(segment: &str, prefix: &str) -> bool {
    segment.starts_with(prefix)
}

/// Applies `prefix` to `name` according to `kind`, unless already present.
pub fn resolve<'a>(name: &'a str, prefix: &str, kind: NameKind) -> Cow<'a, str> {
    match kind {
        NameKind::Package => {
            if is_prefixed(name, prefix) {
                Cow::Borrowed(name)
            } else {
                Cow::Owned(format!("{}{}", prefix, name))
            }
        }
        NameKind::Field => {
            let (head, last) = match name.rfind('.') {
                Some(idx) => name.split_at(idx + 1),
                None => ("", name),
            };
            if is_prefixed(last, prefix) {
                Cow::Borrowed(name)
            } else {
                Cow::Owned(format!("{}{}{}", head, prefix, last))
            }
        }
    }
}

/// Applies `fold_prefix` to the `index`-th `/`-separated segment of `path`.
///
/// A path with fewer segments is returned unchanged. A fold prefix that ends in
/// `/` therefore inserts a whole directory level instead of renaming one.
pub fn resolve_path<'a>(path: &'a str, fold_prefix: &str, index: usize) -> Cow<'a, str> {
    let offset = path
        .split('/')
        .take(index)
        .map(|segment| segment.len() + 1)
        .sum::<usize>();
    if offset > path.len() || (offset == path.len() && index > 0 && !path.ends_with('/')) {
        return Cow::Borrowed(path);
    }
    let (head, tail) = path.split_at(offset);
    // Tested against the tail rather than the segment so that a prefix
    // spanning a `/` is still recognised on the second run.
    if is_prefixed(tail, fold_prefix) {
        return Cow::Borrowed(path);
    }
    Cow::Owned(format!("{}{}{}", head, fold_prefix, tail))
}

/// Removes `prefix` from the front of `segment` if present.
pub fn strip_segment<'a>(segment: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return segment;
    }
    segment.strip_prefix(prefix).unwrap_or(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_prefixes_last_segment() {
        assert_eq!(resolve("amino.name", "dydx_v4_", NameKind::Field), "amino.dydx_v4_name");
        assert_eq!(resolve("name", "dydx_v4_", NameKind::Field), "dydx_v4_name");
    }

    #[test]
    fn package_prefixes_whole_name() {
        assert_eq!(
            resolve("cosmos.bank.v1", "dydx_v4_", NameKind::Package),
            "dydx_v4_cosmos.bank.v1"
        );
    }

    #[test]
    fn already_prefixed_names_are_borrowed() {
        let out = resolve("amino.dydx_v4_name", "dydx_v4_", NameKind::Field);
        assert!(matches!(out, Cow::Borrowed(_)));
        let out = resolve("dydx_v4_amino", "dydx_v4_", NameKind::Package);
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn coincidental_prefix_is_skipped() {
        // Never renamed, yet treated as done: the check is textual only.
        assert_eq!(
            resolve("pkg.dydx_v4_native", "dydx_v4_", NameKind::Field),
            "pkg.dydx_v4_native"
        );
    }

    #[test]
    fn resolve_is_idempotent() {
        for name in ["amino.name", "a.b.c", "x"] {
            for kind in [NameKind::Field, NameKind::Package] {
                let once = resolve(name, "p_", kind).into_owned();
                let twice = resolve(&once, "p_", kind).into_owned();
                assert_eq!(once, twice);
            }
        }
    }

    #[test]
    fn path_segment_is_prefixed() {
        assert_eq!(
            resolve_path("cosmos/bank/v1/bank.proto", "ns_", 0),
            "ns_cosmos/bank/v1/bank.proto"
        );
        assert_eq!(resolve_path("/cosmos/bank", "ns_", 1), "/ns_cosmos/bank");
        assert_eq!(resolve_path("ns_cosmos/bank", "ns_", 0), "ns_cosmos/bank");
        assert_eq!(resolve_path("a", "ns_", 3), "a");
    }

    #[test]
    fn fold_prefix_with_slash_inserts_directory() {
        let once = resolve_path("amino/amino.proto", "vendor/", 0).into_owned();
        assert_eq!(once, "vendor/amino/amino.proto");
        assert_eq!(resolve_path(&once, "vendor/", 0), once);
    }

    #[test]
    fn strip_segment_only_at_start() {
        assert_eq!(strip_segment("dydx_v4_ns_cosmos", "dydx_v4_ns_"), "cosmos");
        assert_eq!(strip_segment("cosmos_dydx_v4_ns_", "dydx_v4_ns_"), "cosmos_dydx_v4_ns_");
        assert_eq!(strip_segment("cosmos", ""), "cosmos");
    }
}
