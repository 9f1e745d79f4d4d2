//! Tree-wide reference rewriting from the registry.
//!
//! Every old name in the mapping is searched for as a whole token: it must
//! not continue an identifier or a dotted name on either side, so `foo.bar`
//! never matches inside `foo.barbaz` or `x.foo.bar`. A leading `.` (fully
//! qualified spelling) is allowed. Optionally a redundant prefix glued to the
//! front of the old name is absorbed into the match, so `p_old` and `old` both
//! become the registry's new name.
//!
//! Matches are collected as byte spans, sorted, and applied from the end of
//! the file backwards so earlier offsets stay valid.

use crate::atomic;
use crate::error::Result;
use crate::registry::Mapping;
use crate::report::{FileReport, FileStatus, StageReport};
use crate::scanner::{self, FileKind, Filter};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A single text replacement with position information.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Replacement {
    start: usize,
    end: usize,
    new_text: String,
}

/// A replacement as shown to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub line: usize,
    pub column: usize,
    pub old: String,
    pub new: String,
}

/// Pending rewrite of one file.
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub file: PathBuf,
    pub changes: Vec<Change>,
    pub new_content: String,
}

#[derive(Debug, Clone)]
struct Target {
    old: String,
    new: String,
}

/// Applies a registry to schema text.
#[derive(Debug, Clone)]
pub struct ReferenceRewriter {
    targets: Vec<Target>,
    redundant_prefix: Option<String>,
}

impl ReferenceRewriter {
    /// Prepares the mapping for matching.
    ///
    /// Chains are resolved to their final name. Entries that loop, or whose
    /// final name still contains the old name as a token, are skipped: applying
    /// them could never reach a fixed point.
    pub fn new(mapping: &Mapping, redundant_prefix: Option<&str>) -> Self {
        let redundant_prefix = redundant_prefix.filter(|p| !p.is_empty()).map(str::to_string);
        let mut targets = Vec::new();

        for (old, _) in mapping.iter() {
            let Some(new) = mapping.resolve(old) else {
                tracing::warn!(old, "mapping chain loops, skipping");
                continue;
            };
            if !find_token(new, old, None).is_empty() {
                tracing::warn!(old, new, "new name contains old name, skipping");
                continue;
            }
            targets.push(Target {
                old: old.to_string(),
                new: new.to_string(),
            });
        }

        // Longest first so that overlapping keys prefer the most specific name.
        targets.sort_by(|a, b| b.old.len().cmp(&a.old.len()).then_with(|| a.old.cmp(&b.old)));

        Self {
            targets,
            redundant_prefix,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Rewrites `content`, returning the new text and the changes made.
    pub fn rewrite(&self, content: &str) -> (String, Vec<Change>) {
        let replacements = self.find_replacements(content);
        let changes = replacements
            .iter()
            .map(|r| {
                let (line, column) = offset_to_line_col(content, r.start);
                Change {
                    line,
                    column,
                    old: content[r.start..r.end].to_string(),
                    new: r.new_text.clone(),
                }
            })
            .collect();
        (apply_replacements(content, replacements), changes)
    }

    fn find_replacements(&self, content: &str) -> Vec<Replacement> {
        let mut found: Vec<Replacement> = Vec::new();
        for target in &self.targets {
            for (start, end) in find_token(content, &target.old, self.redundant_prefix.as_deref()) {
                found.push(Replacement {
                    start,
                    end,
                    new_text: target.new.clone(),
                });
            }
        }

        // Earliest first, longest first on ties; drop anything overlapping a kept span.
        found.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| b.end.cmp(&a.end)));
        let mut kept: Vec<Replacement> = Vec::with_capacity(found.len());
        for rep in found {
            if kept.last().is_some_and(|last| rep.start < last.end) {
                continue;
            }
            kept.push(rep);
        }
        // A span that already reads as its replacement is not a change.
        kept.retain(|rep| content[rep.start..rep.end] != rep.new_text);
        kept
    }

    /// Computes the rewrite of one file without touching it.
    pub fn plan_file(&self, file: &Path) -> Result<FilePlan> {
        let content = atomic::read_to_string(file)?;
        let (new_content, changes) = self.rewrite(&content);
        Ok(FilePlan {
            file: file.to_path_buf(),
            changes,
            new_content,
        })
    }

    /// Rewrites every schema file under `roots`.
    ///
    /// `approve` sees each non-empty plan before it is written and may veto
    /// it. A file that cannot be read or written is reported as failed and
    /// the pass continues. Only a missing root aborts.
    pub fn rewrite_tree(
        &self,
        roots: &[PathBuf],
        filter: &Filter,
        dry_run: bool,
        mut approve: impl FnMut(&FilePlan) -> bool,
    ) -> Result<StageReport> {
        let files = scanner::collect_files(roots, FileKind::Schema, filter)?;
        let mut report = StageReport::new("rewrite-refs");

        for file in files {
            let plan = match self.plan_file(&file) {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "skipping file");
                    let status = FileStatus::Failed {
                        error: e.to_string(),
                    };
                    report.push(FileReport::new(&file, status));
                    continue;
                }
            };

            if plan.changes.is_empty() {
                tracing::debug!(file = %file.display(), "no references");
                report.push(FileReport::new(&file, FileStatus::NoMatch));
                continue;
            }
            if !approve(&plan) {
                report.push(FileReport::new(&file, FileStatus::Unchanged));
                continue;
            }

            let status = if dry_run {
                FileStatus::Changed { changes: plan.changes.len() }
            } else {
                match atomic::write(&file, &plan.new_content) {
                    Ok(()) => FileStatus::Changed { changes: plan.changes.len() },
                    Err(e) => FileStatus::Failed { error: e.to_string() },
                }
            };
            tracing::debug!(
                file = %file.display(),
                changes = plan.changes.len(),
                "rewrote references"
            );
            report.push(FileReport::new(&file, status));
        }

        Ok(report)
    }
}

/// Finds whole-token occurrences of `needle`, optionally extended backwards over
/// a glued-on `prefix`. Returns `(start, end)` byte spans.
fn find_token(haystack: &str, needle: &str, prefix: Option<&str>) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if needle.is_empty() {
        return spans;
    }

    for (idx, _) in haystack.match_indices(needle) {
        let end = idx + needle.len();
        if !ends_token(&haystack[end..]) {
            continue;
        }
        let start = match prefix {
            Some(p) if haystack[..idx].ends_with(p) => idx - p.len(),
            _ => idx,
        };
        if starts_token(&haystack[..start]) {
            spans.push((start, end));
        }
    }

    spans
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The text before a match must not end inside an identifier or dotted name.
fn starts_token(before: &str) -> bool {
    let mut rev = before.chars().rev();
    match rev.next() {
        None => true,
        Some(c) if is_word(c) => false,
        // `.old` is a fully-qualified spelling; `x.old` is a longer name.
        Some('.') => !rev.next().is_some_and(is_word),
        Some(_) => true,
    }
}

/// The text after a match must not continue the identifier or dotted name.
fn ends_token(after: &str) -> bool {
    let mut chars = after.chars();
    match chars.next() {
        None => true,
        Some(c) if is_word(c) => false,
        Some('.') => !chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_'),
        Some(_) => true,
    }
}

/// Applies replacements to source content, returning the modified string.
///
/// Sorts replacements by start offset (descending) and applies each in turn.
/// This ensures earlier replacements don't invalidate later offsets.
fn apply_replacements(content: &str, mut replacements: Vec<Replacement>) -> String {
    replacements.sort_by(|a, b| b.start.cmp(&a.start));

    let mut result = content.to_string();
    for rep in replacements {
        if rep.start <= rep.end && rep.end <= result.len() {
            result.replace_range(rep.start..rep.end, &rep.new_text);
        }
    }

    result
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
