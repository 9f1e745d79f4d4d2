//! Prefix and package configuration shared by every stage.

use serde::Serialize;

/// The two independent prefixes applied by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Prefixes {
    /// Prepended to package names and extension-field identifiers, e.g. `dydx_v4_`.
    pub file_prefix: String,
    /// Prepended to folder segments and import paths, e.g. `dydx_v4_ns_`.
    pub fold_prefix: String,
}

impl Prefixes {
    pub fn new(file_prefix: impl Into<String>, fold_prefix: impl Into<String>) -> Self {
        Self {
            file_prefix: file_prefix.into(),
            fold_prefix: fold_prefix.into(),
        }
    }
}

/// Root packages whose rename must be narrowed to one sub-package.
///
/// Renaming all of `google` would also rename the well-known `google.protobuf`
/// types, which every schema compiler resolves by their canonical name.
const NARROWED_ROOTS: &[(&str, &str)] = &[("google", "google.api")];

/// The set of vendored packages whose declarations and references get renamed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageSet {
    packages: Vec<String>,
}

impl PackageSet {
    /// Builds a set from user-supplied names, applying root narrowing and
    /// dropping blanks and duplicates. Order is preserved.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut packages: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim().trim_matches('.');
            if name.is_empty() {
                continue;
            }
            let name = NARROWED_ROOTS
                .iter()
                .find(|(root, _)| *root == name)
                .map(|(_, narrowed)| (*narrowed).to_string())
                .unwrap_or_else(|| name.to_string());
            if !packages.contains(&name) {
                packages.push(name);
            }
        }
        Self { packages }
    }

    /// Parses a comma-separated list such as `cosmos,amino,google`.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    /// Returns the listed package that `qualified` lives in, if any.
    ///
    /// Matching is by whole dotted segments: `cosmos` owns `cosmos` and
    /// `cosmos.bank.v1`, but not `cosmos_proto`. When several listed packages
    /// match, the longest wins.
    pub fn owner_of(&self, qualified: &str) -> Option<&str> {
        self.packages
            .iter()
            .filter(|pkg| {
                qualified == pkg.as_str()
                    || qualified
                        .strip_prefix(pkg.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .max_by_key(|pkg| pkg.len())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_is_narrowed_to_api() {
        let set = PackageSet::parse_list("cosmos, google ,amino");
        let names: Vec<_> = set.iter().collect();
        assert_eq!(names, vec!["cosmos", "google.api", "amino"]);
    }

    #[test]
    fn blanks_and_duplicates_are_dropped() {
        let set = PackageSet::parse_list("amino,,amino, ");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["amino"]);
    }

    #[test]
    fn owner_matches_whole_segments_only() {
        let set = PackageSet::parse_list("cosmos,google");
        assert_eq!(set.owner_of("cosmos"), Some("cosmos"));
        assert_eq!(set.owner_of("cosmos.bank.v1beta1"), Some("cosmos"));
        assert_eq!(set.owner_of("cosmos_proto.scalar"), None);
        assert_eq!(set.owner_of("google.api.http"), Some("google.api"));
        assert_eq!(set.owner_of("google.protobuf.Any"), None);
    }

    #[test]
    fn longest_listed_package_wins() {
        let set = PackageSet::new(["cosmos", "cosmos.bank"]);
        assert_eq!(set.owner_of("cosmos.bank.v1"), Some("cosmos.bank"));
        assert_eq!(set.owner_of("cosmos.staking"), Some("cosmos"));
    }
}
