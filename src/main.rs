//! proto-isolate: rename a vendored protobuf schema tree into its own namespace.
//!
//! Each subcommand runs one stage of the isolation pipeline over a tree and
//! prints a per-file report. A file that fails is reported and skipped; the
//! process still exits non-zero once the pass completes.

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Args, Commands, FilterArgs, PrefixArgs};
use colored::Colorize;
use dialoguer::Confirm;
use proto_isolate::descriptor::{self, Marker, PatchMode};
use proto_isolate::mirror;
use proto_isolate::registry::{ExtensionRegistry, MergeSummary};
use proto_isolate::rewriter::{FilePlan, ReferenceRewriter};
use proto_isolate::scanner::{self, FileKind, Filter};
use proto_isolate::source::{self, SourceJob, SourceRewriter};
use proto_isolate::{PackageSet, Prefixes, StageReport};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let out = Output {
        json: args.json,
        verbose: args.verbose,
    };

    match args.command {
        Commands::RewriteSource {
            paths,
            output,
            prefixes,
            packages,
            mapping,
            lock_timeout,
            filter,
            dry_run,
        } => {
            let store = registry_at(&mapping, lock_timeout);
            cmd_rewrite_source(out, &paths, output, &prefixes, &packages, &store, &filter, dry_run)
        }
        Commands::RewriteRefs {
            dir,
            mapping,
            prefix,
            interactive,
            filter,
            dry_run,
        } => {
            let prefix = prefix.as_deref();
            cmd_rewrite_refs(out, &dir, &mapping, prefix, interactive, &filter, dry_run)
        }
        Commands::Pipeline {
            dir,
            prefixes,
            packages,
            mapping,
            lock_timeout,
            filter,
            dry_run,
        } => {
            let store = registry_at(&mapping, lock_timeout);
            cmd_pipeline(out, &dir, &prefixes, &packages, &store, &filter, dry_run)
        }
        Commands::PatchDescriptor {
            paths,
            mode,
            marker_namespace,
            filter,
            dry_run,
        } => cmd_patch_descriptor(out, &paths, mode.into(), &marker_namespace, &filter, dry_run),
        Commands::Inspect {
            file,
            marker_namespace,
        } => cmd_inspect(out, &file, &marker_namespace),
        Commands::Mirror {
            source,
            prefixes,
            dry_run,
        } => cmd_mirror(out, &source, &prefixes, dry_run),
        Commands::PublicApi {
            packages,
            base_dir,
            fold_prefix,
            dry_run,
        } => cmd_public_api(out, &packages, &base_dir, &fold_prefix, dry_run),
        Commands::Registry { mapping } => cmd_registry(out, &mapping),
        Commands::Scan { paths, filter } => cmd_scan(out, paths, &filter),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "proto_isolate=debug" } else { "proto_isolate=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
    verbose: bool,
}

impl Output {
    fn info(&self, message: impl AsRef<str>) {
        if !self.json {
            eprintln!("{} {}", "info:".blue().bold(), message.as_ref());
        }
    }

    fn warn(&self, message: impl AsRef<str>) {
        eprintln!("{} {}", "warn:".yellow().bold(), message.as_ref());
    }

    /// Prints every report, then fails if any file failed.
    fn finish(&self, reports: &[&StageReport], mapping: Option<MergeSummary>) -> Result<()> {
        if self.json {
            let value = serde_json::json!({
                "stages": reports,
                "mapping": mapping,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            for report in reports {
                report.print(self.verbose);
            }
            if let Some(summary) = mapping {
                println!(
                    "{} mapping: {} added, {} already present",
                    "info:".blue().bold(),
                    summary.added,
                    summary.unchanged
                );
            }
        }

        let failed: usize = reports.iter().map(|r| r.diagnostics.failed).sum();
        if failed > 0 {
            bail!("{} file(s) failed", failed);
        }
        Ok(())
    }
}

fn filter_from(args: &FilterArgs) -> Filter {
    Filter::new(&args.exclude, !args.no_default_excludes)
}

fn prefixes_from(args: &PrefixArgs) -> Prefixes {
    Prefixes::new(&args.file_prefix, &args.fold_prefix)
}

fn registry_at(mapping: &Path, lock_timeout_secs: u64) -> ExtensionRegistry {
    ExtensionRegistry::new(mapping).with_lock_timeout(Duration::from_secs(lock_timeout_secs))
}

#[allow(clippy::too_many_arguments)]
fn cmd_rewrite_source(
    out: Output,
    paths: &[PathBuf],
    output: Option<PathBuf>,
    prefixes: &PrefixArgs,
    packages: &[String],
    store: &ExtensionRegistry,
    filter: &FilterArgs,
    dry_run: bool,
) -> Result<()> {
    let prefixes = prefixes_from(prefixes);
    let packages = PackageSet::new(packages);
    if packages.is_empty() {
        out.warn("no --packages given; only extension fields will be renamed");
    }
    let rewriter = SourceRewriter::new(&prefixes, &packages);

    let (report, summary) = match output {
        Some(output) => {
            let [input] = paths else {
                bail!("--output requires exactly one input file");
            };
            if !input.is_file() {
                bail!("--output requires an input file, got {}", input.display());
            }
            let job = SourceJob {
                input: input.clone(),
                output,
            };
            source::rewrite_files(&rewriter, &[job], store, dry_run)
        }
        None => source::rewrite_tree(&rewriter, paths, &filter_from(filter), store, dry_run),
    }
    .with_context(|| format!("rewriting schema sources into {}", store.path().display()))?;

    out.finish(&[&report], Some(summary))
}

fn cmd_rewrite_refs(
    out: Output,
    dir: &Path,
    mapping: &Path,
    prefix: Option<&str>,
    interactive: bool,
    filter: &FilterArgs,
    dry_run: bool,
) -> Result<()> {
    let mapping = ExtensionRegistry::new(mapping).load()?;
    if mapping.is_empty() {
        out.info("mapping is empty, nothing to rewrite");
        return Ok(());
    }
    out.info(format!("applying {} mapping entries", mapping.len()));

    let rewriter = ReferenceRewriter::new(&mapping, prefix);
    let roots = [dir.to_path_buf()];
    let report = if interactive {
        rewriter.rewrite_tree(&roots, &filter_from(filter), dry_run, confirm_plan)?
    } else {
        rewriter.rewrite_tree(&roots, &filter_from(filter), dry_run, |_| true)?
    };

    if dry_run && !out.json {
        println!("\n{} Re-run without --dry-run to apply changes", "hint:".cyan().bold());
    }
    out.finish(&[&report], None)
}

fn confirm_plan(plan: &FilePlan) -> bool {
    println!("\n{} {}", "File:".yellow().bold(), plan.file.display());
    for change in &plan.changes {
        println!(
            "  {}:{}: {} -> {}",
            change.line,
            change.column,
            change.old.red(),
            change.new.green()
        );
    }
    match Confirm::new()
        .with_prompt("Apply these changes?")
        .default(true)
        .interact()
    {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(error = %e, "prompt failed, skipping file");
            false
        }
    }
}

fn cmd_pipeline(
    out: Output,
    dir: &Path,
    prefixes: &PrefixArgs,
    packages: &[String],
    store: &ExtensionRegistry,
    filter: &FilterArgs,
    dry_run: bool,
) -> Result<()> {
    let prefixes = prefixes_from(prefixes);
    let packages = PackageSet::new(packages);
    let filter = filter_from(filter);
    let roots = [dir.to_path_buf()];

    let rewriter = SourceRewriter::new(&prefixes, &packages);
    let (sources, summary) = source::rewrite_tree(&rewriter, &roots, &filter, store, dry_run)
        .context("source rewrite stage")?;

    // A dry run never persisted the new entries, so merge them in memory.
    let merged = if dry_run {
        let mut deltas = Vec::new();
        for file in scanner::collect_files(&roots, FileKind::Schema, &filter)? {
            let content = proto_isolate::atomic::read_to_string(&file)?;
            deltas.extend(rewriter.rewrite(&content, &file).deltas);
        }
        proto_isolate::registry::merge(&store.load()?, &deltas)?.0
    } else {
        store.load()?
    };

    let refs = ReferenceRewriter::new(&merged, None)
        .rewrite_tree(&roots, &filter, dry_run, |_| true)
        .context("reference rewrite stage")?;

    out.finish(&[&sources, &refs], Some(summary))
}

fn cmd_patch_descriptor(
    out: Output,
    paths: &[PathBuf],
    mode: PatchMode,
    marker_namespace: &str,
    filter: &FilterArgs,
    dry_run: bool,
) -> Result<()> {
    let marker = Marker::new(marker_namespace).map_err(anyhow::Error::msg)?;
    out.info(format!("marker option: {}", marker.name_part()));
    let report = descriptor::patch_tree(paths, &filter_from(filter), &marker, mode, dry_run)?;
    out.finish(&[&report], None)
}

fn cmd_inspect(out: Output, file: &Path, marker_namespace: &str) -> Result<()> {
    let marker = Marker::new(marker_namespace).map_err(anyhow::Error::msg)?;
    let Some(summary) = descriptor::inspect(file, &marker)? else {
        out.warn(format!("no serialized descriptor found in {}", file.display()));
        return Ok(());
    };
    if out.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print();
    }
    Ok(())
}

fn cmd_mirror(out: Output, source: &Path, prefixes: &PrefixArgs, dry_run: bool) -> Result<()> {
    let plan = mirror::plan_static(source, &prefixes.fold_prefix, &prefixes.file_prefix)?;
    if plan.shims.is_empty() {
        out.warn(format!(
            "no modules under {} matched fold prefix '{}' and file prefix '{}'",
            source.display(),
            prefixes.fold_prefix,
            prefixes.file_prefix
        ));
    }
    let report = mirror::write_static(&plan, dry_run);
    out.finish(&[&report], None)
}

fn cmd_public_api(
    out: Output,
    packages: &[String],
    base_dir: &Path,
    fold_prefix: &str,
    dry_run: bool,
) -> Result<()> {
    let report = mirror::write_dynamic(base_dir, fold_prefix, packages, dry_run)?;
    out.finish(&[&report], None)
}

fn cmd_registry(out: Output, mapping: &Path) -> Result<()> {
    let store = ExtensionRegistry::new(mapping);
    let mapping = store.load()?;
    if out.json {
        println!("{}", serde_json::to_string_pretty(&mapping)?);
        return Ok(());
    }
    if mapping.is_empty() {
        println!("{} {} has no entries", "info:".blue().bold(), store.path().display());
        return Ok(());
    }
    mapping.print();
    Ok(())
}

fn cmd_scan(out: Output, paths: Option<Vec<PathBuf>>, filter: &FilterArgs) -> Result<()> {
    let scan_paths = paths.unwrap_or_else(|| vec![PathBuf::from(".")]);
    let files = scanner::collect_files(&scan_paths, FileKind::Schema, &filter_from(filter))?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    println!("Would scan {} files:", files.len());
    for file in files {
        println!("  {}", file.display());
    }
    Ok(())
}
