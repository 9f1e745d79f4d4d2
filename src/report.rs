//! Per-file outcomes and stage summaries.
//!
//! Every stage reports what it did to each file it touched. A stage never
//! aborts because one file failed; the failure is recorded here instead and
//! the CLI turns it into a non-zero exit once the pass completes.

use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// What a stage did to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// The file was rewritten with `changes` edits.
    Changed { changes: usize },
    /// Rewritable constructs were found but already in their final form.
    Unchanged,
    /// The stage's pattern does not occur in this file. Not an error.
    NoMatch,
    /// A descriptor in this file already carries the marker option.
    AlreadyPatched,
    /// The file could not be processed and was skipped.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
    /// Non-fatal observations, e.g. unparseable extension fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl FileReport {
    pub fn new(file: impl Into<PathBuf>, status: FileStatus) -> Self {
        Self {
            file: file.into(),
            status,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// Summary statistics for one stage run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub files_unchanged: usize,
    pub no_match: usize,
    pub already_patched: usize,
    pub failed: usize,
    pub total_changes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub files: Vec<FileReport>,
    pub diagnostics: Diagnostics,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            files: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn push(&mut self, report: FileReport) {
        let d = &mut self.diagnostics;
        d.files_scanned += 1;
        match &report.status {
            FileStatus::Changed { changes } => {
                d.files_changed += 1;
                d.total_changes += changes;
            }
            FileStatus::Unchanged => d.files_unchanged += 1,
            FileStatus::NoMatch => d.no_match += 1,
            FileStatus::AlreadyPatched => d.already_patched += 1,
            FileStatus::Failed { .. } => d.failed += 1,
        }
        self.files.push(report);
    }

    pub fn has_failures(&self) -> bool {
        self.diagnostics.failed > 0
    }

    /// Prints the report for humans, in the same register as the rest of the CLI.
    pub fn print(&self, verbose: bool) {
        let d = &self.diagnostics;

        for file in &self.files {
            let path = file.file.display().to_string();
            match &file.status {
                FileStatus::Changed { changes } => {
                    println!("  {} {} ({} edit(s))", "updated".green(), path, changes)
                }
                FileStatus::Failed { error } => {
                    println!("  {} {}: {}", "failed".red().bold(), path, error)
                }
                FileStatus::NoMatch => {
                    println!("  {} {}", "no match".yellow(), path.dimmed())
                }
                FileStatus::AlreadyPatched if verbose => {
                    println!("  {} {}", "already patched".dimmed(), path.dimmed())
                }
                FileStatus::Unchanged if verbose => {
                    println!("  {} {}", "unchanged".dimmed(), path.dimmed())
                }
                _ => {}
            }
            for note in &file.notes {
                println!("    {} {}", "warn:".yellow().bold(), note);
            }
        }

        println!(
            "\n{} {}: {} file(s), {} changed, {} unchanged, {} no match, {} failed",
            if self.has_failures() {
                "error:".red().bold()
            } else {
                "ok:".green().bold()
            },
            self.stage,
            d.files_scanned,
            d.files_changed,
            d.files_unchanged + d.already_patched,
            d.no_match,
            d.failed
        );
    }
}
