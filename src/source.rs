//! Block-scoped rewriting of `.proto` source text.
//!
//! The rewriter walks a file line by line with two pieces of state: the active
//! package (from the most recent top-level `package` declaration, as rewritten)
//! and whether it is inside an `extend google.protobuf.<Kind> { ... }` block.
//! Each line is classified into one lexical block and rewritten accordingly:
//!
//! - `package x.y;` gets the file prefix when `x.y` is a configured package.
//! - Field declarations inside a recognised extend block get the file prefix on
//!   their identifier; each rename yields a [`RenameEntry`]. Field numbers are
//!   never touched.
//! - `use_package: {name: "..."}` gets the fold prefix.
//! - Qualified references to configured packages (after `(`, `"`, `<`, `,`, a
//!   label keyword, or at statement start) get the file prefix.
//! - `import "..."` paths and quoted `"/pkg/..."` fragments get the fold prefix
//!   on their leading package directory.
//!
//! This is lexical, not a grammar: multi-line declarations inside an extend
//! block are left alone and reported as notes.

use crate::atomic;
use crate::config::{PackageSet, Prefixes};
use crate::error::Result;
use crate::registry::{self, ExtensionRegistry, MergeSummary, RenameEntry};
use crate::report::{FileReport, FileStatus, StageReport};
use crate::resolver::{self, NameKind};
use crate::scanner::{self, FileKind, Filter};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(package\s+)([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)(\s*;.*)$").unwrap()
});

static EXTEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*extend\s+\.?google\.protobuf\.((?:Enum|EnumValue|Field|File|Message|Method|Service)Options|FeatureSet)\s*\{",
    )
    .unwrap()
});

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*(?:\S+\s+){1,2})([A-Za-z_]\w*)(\s*=\s*\d+\s*(?:\[.*\])?\s*;.*)$").unwrap()
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*import\s+(?:public\s+|weak\s+)?")([^"]*)(".*)$"#).unwrap()
});

static USE_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*use_package:\s*\{\s*name:\s*")([^"]*)(".*)$"#).unwrap()
});

static QUALIFIED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.?[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)+").unwrap());

/// Keywords after which a type reference may follow.
const LABELS: &[&str] = &["repeated", "optional", "required", "stream"];

/// The eight option kinds whose extension fields get renamed.
pub const EXTENSION_KINDS: &[&str] = &[
    "EnumOptions",
    "EnumValueOptions",
    "FieldOptions",
    "FileOptions",
    "MessageOptions",
    "MethodOptions",
    "ServiceOptions",
    "FeatureSet",
];

/// Result of rewriting one schema file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRewrite {
    pub content: String,
    /// Extension-field renames made in this file, in source order.
    pub deltas: Vec<RenameEntry>,
    /// Number of constructs rewritten.
    pub changes: usize,
    /// Lines inside extend blocks that could not be understood.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    TopLevel,
    Extension { depth: i64 },
}

/// Rewrites schema source for one prefix configuration.
#[derive(Debug, Clone)]
pub struct SourceRewriter<'a> {
    prefixes: &'a Prefixes,
    packages: &'a PackageSet,
}

impl<'a> SourceRewriter<'a> {
    pub fn new(prefixes: &'a Prefixes, packages: &'a PackageSet) -> Self {
        Self { prefixes, packages }
    }

    /// Rewrites `content`, attributing mapping deltas to `source`.
    pub fn rewrite(&self, content: &str, source: &Path) -> SourceRewrite {
        let mut out = SourceRewrite {
            content: String::with_capacity(content.len() + 64),
            ..SourceRewrite::default()
        };
        let mut state = State::TopLevel;
        let mut active_package: Option<String> = None;

        for (idx, raw) in content.split_inclusive('\n').enumerate() {
            let (line, ending) = split_ending(raw);
            let lineno = idx + 1;

            if let Some(caps) = PACKAGE_RE.captures(line) {
                let name = &caps[2];
                let renamed = match self.packages.owner_of(name) {
                    Some(_) => {
                        resolver::resolve(name, &self.prefixes.file_prefix, NameKind::Package)
                    }
                    None => name.into(),
                };
                if renamed != name {
                    out.changes += 1;
                }
                active_package = Some(renamed.to_string());
                out.content.push_str(&caps[1]);
                out.content.push_str(&renamed);
                out.content.push_str(&caps[3]);
                out.content.push_str(ending);
                continue;
            }

            let mut line = line.to_string();
            match state {
                State::TopLevel => {
                    if EXTEND_RE.is_match(&line) {
                        let depth = brace_delta(&line);
                        if depth > 0 {
                            state = State::Extension { depth };
                        } else {
                            let package = active_package.as_deref();
                            self.rename_inline_fields(&mut line, package, source, lineno, &mut out);
                        }
                    }
                }
                State::Extension { depth } => {
                    let depth = depth + brace_delta(&line);
                    if depth <= 0 {
                        state = State::TopLevel;
                    } else {
                        state = State::Extension { depth };
                        let package = active_package.as_deref();
                        if let Some(entry) =
                            self.rename_field(&mut line, package, source, lineno, &mut out.notes)
                        {
                            out.changes += 1;
                            out.deltas.push(entry);
                        }
                    }
                }
            }

            out.changes += self.rewrite_references(&mut line);
            out.content.push_str(&line);
            out.content.push_str(ending);
        }

        out
    }

    /// Renames every field of an extend block that opens and closes on `line`.
    fn rename_inline_fields(
        &self,
        line: &mut String,
        package: Option<&str>,
        source: &Path,
        lineno: usize,
        out: &mut SourceRewrite,
    ) {
        let (Some(open), Some(close)) = (line.find('{'), line.rfind('}')) else {
            return;
        };
        if close <= open {
            return;
        }

        let mut body = String::with_capacity(close - open);
        for statement in line[open + 1..close].split_inclusive(';') {
            let mut statement = statement.to_string();
            if !statement.trim().is_empty() {
                if let Some(entry) =
                    self.rename_field(&mut statement, package, source, lineno, &mut out.notes)
                {
                    out.changes += 1;
                    out.deltas.push(entry);
                }
            }
            body.push_str(&statement);
        }
        line.replace_range(open + 1..close, &body);
    }

    /// Renames the identifier of an extension field declaration in place.
    fn rename_field(
        &self,
        line: &mut String,
        package: Option<&str>,
        source: &Path,
        lineno: usize,
        notes: &mut Vec<String>,
    ) -> Option<RenameEntry> {
        let Some(caps) = FIELD_RE.captures(line) else {
            if is_declaration_like(line) {
                tracing::warn!(
                    file = %source.display(),
                    line = lineno,
                    "unrecognised extension field"
                );
                let text = line.trim();
                notes.push(format!("line {}: extension field not rewritten: {}", lineno, text));
            }
            return None;
        };

        let old = &caps[2];
        let new = resolver::resolve(old, &self.prefixes.file_prefix, NameKind::Field);
        if new == old {
            return None;
        }

        let qualify = |ident: &str| match package {
            Some(pkg) => format!("{}.{}", pkg, ident),
            None => ident.to_string(),
        };
        let entry = RenameEntry::new(qualify(old), qualify(&new), source);
        *line = format!("{}{}{}", &caps[1], new, &caps[3]);
        Some(entry)
    }

    /// Applies the package- and path-level rewrites to one line.
    fn rewrite_references(&self, line: &mut String) -> usize {
        let mut changes = 0;

        if let Some(caps) = IMPORT_RE.captures(line) {
            let path = &caps[2];
            let renamed = self.fold_package_path(path, 0);
            if renamed != path {
                *line = format!("{}{}{}", &caps[1], renamed, &caps[3]);
                changes += 1;
            }
            // Import lines hold nothing else worth rewriting.
            return changes;
        }

        if let Some(caps) = USE_PACKAGE_RE.captures(line) {
            let name = &caps[2];
            if self.packages.owner_of(name).is_some() {
                let renamed =
                    resolver::resolve(name, &self.prefixes.fold_prefix, NameKind::Package);
                if renamed != name {
                    *line = format!("{}{}{}", &caps[1], renamed, &caps[3]);
                    changes += 1;
                }
            }
            return changes;
        }

        changes += self.prefix_qualified_refs(line);
        changes += self.fold_quoted_paths(line);
        changes
    }

    /// Prefixes qualified references whose leading segments name a configured package.
    fn prefix_qualified_refs(&self, line: &mut String) -> usize {
        if self.packages.is_empty() {
            return 0;
        }
        let code_end = comment_start(line).unwrap_or(line.len());
        let mut inserts = Vec::new();

        for m in QUALIFIED_RE.find_iter(&line[..code_end]) {
            let before = &line[..m.start()];
            if before.chars().next_back().is_some_and(is_ident_char) {
                continue;
            }
            if !is_reference_context(before) {
                continue;
            }
            let (dot, name) = match m.as_str().strip_prefix('.') {
                Some(rest) => (1, rest),
                None => (0, m.as_str()),
            };
            if self.packages.owner_of(name).is_none() {
                continue;
            }
            if resolver::is_prefixed(name, &self.prefixes.file_prefix) {
                continue;
            }
            inserts.push(m.start() + dot);
        }

        for at in inserts.iter().rev() {
            line.insert_str(*at, &self.prefixes.file_prefix);
        }
        inserts.len()
    }

    /// Rewrites quoted `"/pkg/..."` fragments for configured packages.
    fn fold_quoted_paths(&self, line: &mut String) -> usize {
        let mut changes = 0;
        let mut search = 0;

        while let Some(found) = line[search..].find("\"/") {
            let start = search + found + 1;
            let end = line[start..].find('"').map_or(line.len(), |e| start + e);
            let fragment = line[start..end].to_string();
            let renamed = self.fold_package_path(&fragment, 1);
            if renamed != fragment {
                line.replace_range(start..end, &renamed);
                changes += 1;
            }
            search = start + renamed.len();
            if search >= line.len() {
                break;
            }
        }

        changes
    }

    /// Applies the fold prefix to `path` when the segment at `index` begins a
    /// configured package's directory.
    fn fold_package_path(&self, path: &str, index: usize) -> String {
        let tail: String = path.split('/').skip(index).collect::<Vec<_>>().join("/");
        let owned = self.packages.iter().any(|pkg| {
            let dir = pkg.replace('.', "/");
            tail.strip_prefix(&dir).is_some_and(|rest| rest.starts_with('/'))
        });
        if owned {
            resolver::resolve_path(path, &self.prefixes.fold_prefix, index).into_owned()
        } else {
            path.to_string()
        }
    }
}

/// One schema file to rewrite and where its result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl SourceJob {
    pub fn in_place(path: impl Into<PathBuf>) -> Self {
        let input = path.into();
        Self {
            output: input.clone(),
            input,
        }
    }
}

/// Rewrites every schema file under `roots` in place.
pub fn rewrite_tree(
    rewriter: &SourceRewriter<'_>,
    roots: &[PathBuf],
    filter: &Filter,
    store: &ExtensionRegistry,
    dry_run: bool,
) -> Result<(StageReport, MergeSummary)> {
    let jobs: Vec<SourceJob> = scanner::collect_files(roots, FileKind::Schema, filter)?
        .into_iter()
        .map(SourceJob::in_place)
        .collect();
    rewrite_files(rewriter, &jobs, store, dry_run)
}

/// Rewrites `jobs` and merges every extension rename into `store`.
///
/// All files are rewritten in memory first and the registry is updated in a
/// single locked acquisition before anything is written, so a mapping
/// conflict aborts the run with no schema file modified. Files that cannot be
/// read are reported as failed and contribute no renames.
pub fn rewrite_files(
    rewriter: &SourceRewriter<'_>,
    jobs: &[SourceJob],
    store: &ExtensionRegistry,
    dry_run: bool,
) -> Result<(StageReport, MergeSummary)> {
    let mut report = StageReport::new("rewrite-source");
    let mut pending = Vec::with_capacity(jobs.len());
    let mut deltas = Vec::new();

    for job in jobs {
        match atomic::read_to_string(&job.input) {
            Ok(content) => {
                let rewrite = rewriter.rewrite(&content, &job.input);
                deltas.extend(rewrite.deltas.iter().cloned());
                pending.push((job, content, rewrite));
            }
            Err(e) => {
                tracing::warn!(file = %job.input.display(), error = %e, "skipping file");
                let status = FileStatus::Failed {
                    error: e.to_string(),
                };
                report.push(FileReport::new(&job.input, status));
            }
        }
    }

    let summary = if dry_run {
        registry::merge(&store.load()?, &deltas)?.1
    } else {
        store.update(&deltas)?.1
    };

    for (job, original, rewrite) in pending {
        let unchanged = rewrite.content == original && job.output == job.input;
        let status = if unchanged {
            FileStatus::Unchanged
        } else if dry_run {
            FileStatus::Changed { changes: rewrite.changes }
        } else {
            match atomic::write(&job.output, &rewrite.content) {
                Ok(()) => FileStatus::Changed { changes: rewrite.changes },
                Err(e) => FileStatus::Failed { error: e.to_string() },
            }
        };
        tracing::debug!(
            file = %job.input.display(),
            changes = rewrite.changes,
            renames = rewrite.deltas.len(),
            "rewrote schema"
        );
        report.push(FileReport::new(&job.output, status).with_notes(rewrite.notes));
    }

    tracing::info!(
        files = report.diagnostics.files_scanned,
        added = summary.added,
        "source rewrite complete"
    );
    Ok((report, summary))
}

fn split_ending(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Byte offset of a `//` comment that is not inside a string literal.
fn comment_start(line: &str) -> Option<usize> {
    let mut in_string = false;
    let mut prev = '\0';
    for (i, c) in line.char_indices() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '/' if !in_string && prev == '/' => return Some(i - 1),
            _ => {}
        }
        prev = c;
    }
    None
}

/// Net `{` minus `}` outside string literals and comments.
fn brace_delta(line: &str) -> i64 {
    let code = &line[..comment_start(line).unwrap_or(line.len())];
    let mut in_string = false;
    let mut prev = '\0';
    let mut delta = 0;
    for c in code.chars() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
        prev = c;
    }
    delta
}

/// Whether the text preceding a dotted name puts it in reference position.
fn is_reference_context(before: &str) -> bool {
    if before.ends_with('(') || before.ends_with('"') {
        return true;
    }
    let trimmed = before.trim_end();
    if trimmed.is_empty() || trimmed.ends_with('<') || trimmed.ends_with(',') {
        return true;
    }
    LABELS.iter().any(|label| {
        trimmed.strip_suffix(label).is_some_and(|head| {
            let head = head.trim_end();
            head.is_empty() || head.ends_with('(')
        })
    })
}

/// Lines inside an extend block that look like they meant to declare something.
fn is_declaration_like(line: &str) -> bool {
    let t = line.trim();
    !(t.is_empty()
        || t.starts_with("//")
        || t.starts_with("/*")
        || t.starts_with('*')
        || t.starts_with("option")
        || t.starts_with("reserved")
        || t.chars().all(|c| c == '{' || c == '}' || c == ';'))
}
