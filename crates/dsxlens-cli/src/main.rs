mod rewrite;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

use dsxlens_catalog::{SchemaCatalog, SnapshotCatalog, TableIdentifier};
use dsxlens_core::{
    ColumnChange, Config, EventSeverity, IntegrityIssue, JobTableMetadata, PhysicalReference, PhysicalTable, Report,
    Severity,
};
use dsxlens_engine::{
    plan_column_deletion, summarize, trace_impact, validate, validate_change, DependencyIndex, ErrorClassifier,
    FromDocument, IndexOptions, ReplacementRequest,
};
use dsxlens_export::{ExportFile, JobDocument};

/// dsxlens - dependency analysis and safe schema changes for DataStage exports
#[derive(Parser)]
#[command(name = "dsxlens")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: dsxlens.toml, or $DSXLENS_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write a JSON report to this file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the jobs in export files or directories
    Jobs {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Show the job records referencing a table or column, and the jobs downstream of it
    Impact {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Table as SCHEMA.TABLE (or TABLE)
        #[arg(short, long, value_parser = parse_table)]
        table: PhysicalReference,

        #[arg(long)]
        column: Option<String>,

        /// How many levels of downstream jobs to follow
        #[arg(long, default_value_t = 3)]
        levels: usize,
    },

    /// Rename a table everywhere it is referenced
    RenameTable {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long, value_parser = parse_table)]
        from: PhysicalReference,

        #[arg(long, value_parser = parse_table)]
        to: PhysicalReference,

        /// Print the changelog without writing files
        #[arg(long)]
        dry_run: bool,
    },

    /// Rename a column of one table
    RenameColumn {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_parser = parse_table)]
        table: PhysicalReference,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Replace a connection name or connection-string value
    ReplaceConnection {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Report where a column is used before it is dropped (never edits files)
    DeleteColumn {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_parser = parse_table)]
        table: PhysicalReference,

        #[arg(long)]
        column: String,
    },

    /// Compare job column definitions with the database catalog
    Validate {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Catalog snapshot (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Table as SCHEMA.TABLE
        #[arg(short, long, value_parser = parse_qualified_table)]
        table: PhysicalReference,
    },

    /// Plan the DDL for a column change, refusing when jobs would break
    PlanDdl {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long)]
        catalog: PathBuf,

        /// Table as SCHEMA.TABLE
        #[arg(short, long, value_parser = parse_qualified_table)]
        table: PhysicalReference,

        #[arg(long)]
        column: String,

        /// New type name, e.g. NVARCHAR
        #[arg(long = "type")]
        data_type: Option<String>,

        #[arg(long)]
        length: Option<u32>,

        #[arg(long)]
        scale: Option<u32>,

        #[arg(long)]
        nullable: Option<bool>,

        #[arg(long)]
        rename: Option<String>,

        /// Take the column out of its key constraints
        #[arg(long)]
        drop_from_key: bool,

        /// Write the SQL script to this file
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Classify database errors found in a job log
    Classify {
        log: PathBuf,
    },
}

/// Settings shared by every command
struct Session {
    config: Config,
    options: IndexOptions,
    output: Option<PathBuf>,
    verbose: bool,
}

/// One parsed export file
struct LoadedExport {
    path: PathBuf,
    export: ExportFile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.verbose)?;
    if cli.verbose {
        eprintln!("{} dialect: {:?}, schema match: {:?}", "Using".cyan(), config.dialect, config.schema_match);
    }

    let session = Session {
        options: IndexOptions::from_config(&config),
        config,
        output: cli.output,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Jobs { inputs } => jobs_command(&session, &inputs),
        Commands::Impact {
            inputs,
            table,
            column,
            levels,
        } => impact_command(&session, &inputs, &table, column.as_deref(), levels),
        Commands::RenameTable {
            inputs,
            from,
            to,
            dry_run,
        } => replace_command(&session, &inputs, ReplacementRequest::RenameTable { from, to }, dry_run),
        Commands::RenameColumn {
            inputs,
            table,
            from,
            to,
            dry_run,
        } => replace_command(&session, &inputs, ReplacementRequest::RenameColumn { table, from, to }, dry_run),
        Commands::ReplaceConnection {
            inputs,
            from,
            to,
            dry_run,
        } => replace_command(&session, &inputs, ReplacementRequest::ReplaceConnection { from, to }, dry_run),
        Commands::DeleteColumn { inputs, table, column } => delete_column_command(&session, &inputs, &table, &column),
        Commands::Validate { inputs, catalog, table } => validate_command(&session, &inputs, &catalog, &table).await,
        Commands::PlanDdl {
            inputs,
            catalog,
            table,
            column,
            data_type,
            length,
            scale,
            nullable,
            rename,
            drop_from_key,
            script,
        } => {
            let mut change = ColumnChange::new(column);
            if let Some(data_type) = data_type {
                change = change.with_type(data_type);
            }
            if let Some(length) = length {
                change = change.with_length(length);
            }
            change.new_scale = scale;
            if let Some(nullable) = nullable {
                change = change.with_nullable(nullable);
            }
            if let Some(new_name) = rename {
                change = change.renamed(new_name);
            }
            if drop_from_key {
                change = change.dropping_key();
            }
            plan_ddl_command(&session, &inputs, &catalog, &table, &change, script.as_deref()).await
        }
        Commands::Classify { log } => classify_command(&session, &log),
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `--verbose`
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(explicit: Option<&Path>, verbose: bool) -> Result<Config> {
    let from_env = std::env::var_os("DSXLENS_CONFIG").map(PathBuf::from);
    let path = explicit.map(Path::to_path_buf).or(from_env);

    if let Some(path) = path {
        return Config::from_file(&path).with_context(|| format!("Failed to load config {}", path.display()));
    }
    if Path::new("dsxlens.toml").exists() {
        return Config::from_file(Path::new("dsxlens.toml")).context("Failed to load dsxlens.toml");
    }

    if verbose {
        eprintln!("{}", "No config file found, using defaults".yellow());
    }
    Ok(Config::default())
}

/// `ERP.ORDERS` or `ORDERS`
fn parse_table(value: &str) -> Result<PhysicalReference, String> {
    let parts: Vec<&str> = value.split('.').collect();
    match parts.as_slice() {
        [table] if !table.trim().is_empty() => Ok(PhysicalReference::unqualified(table.trim())),
        [schema, table] if !schema.trim().is_empty() && !table.trim().is_empty() => {
            Ok(PhysicalReference::table(schema.trim(), table.trim()))
        }
        _ => Err(format!("expected SCHEMA.TABLE or TABLE, got '{value}'")),
    }
}

/// Catalog lookups need the schema
fn parse_qualified_table(value: &str) -> Result<PhysicalReference, String> {
    let reference = parse_table(value)?;
    if !reference.is_qualified() {
        return Err(format!("catalog tables must be given as SCHEMA.TABLE, got '{value}'"));
    }
    Ok(reference)
}

fn is_export_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("dsx"))
        .unwrap_or(false)
}

/// Expand directories to the `.dsx` files below them
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", input.display()))?;
                if entry.file_type().is_file() && is_export_file(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            bail!("Input not found: {}", input.display());
        }
    }

    if files.is_empty() {
        bail!("No .dsx files found in the given inputs");
    }
    Ok(files)
}

fn read_export(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Parse every input file; malformed jobs are reported and left out
fn load_exports(session: &Session, inputs: &[PathBuf]) -> Result<Vec<LoadedExport>> {
    let mut loaded = Vec::new();

    for path in collect_inputs(inputs)? {
        let export = ExportFile::parse(&read_export(&path)?);
        for error in export.errors() {
            eprintln!("{} {}: {}", "warning:".yellow().bold(), path.display(), error);
        }
        if session.verbose {
            eprintln!("{} {} ({} jobs)", "Loaded".cyan(), path.display(), export.jobs().count());
        }
        loaded.push(LoadedExport { path, export });
    }

    Ok(loaded)
}

fn documents(loaded: &[LoadedExport]) -> impl Iterator<Item = &JobDocument> {
    loaded.iter().flat_map(|file| file.export.jobs())
}

fn write_report(session: &Session, report: &Report) -> Result<()> {
    if let Some(path) = &session.output {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        eprintln!("{} {}", "Report saved to:".green(), path.display());
    }
    Ok(())
}

fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", title.bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
}

/// Jobs command - list jobs and how many references each holds
fn jobs_command(session: &Session, inputs: &[PathBuf]) -> Result<()> {
    let loaded = load_exports(session, inputs)?;
    let index = DependencyIndex::build(documents(&loaded), &session.options);

    print_header("Jobs");
    let mut listed = Vec::new();
    for file in &loaded {
        println!("{}", file.path.display().to_string().bold());
        for job in file.export.jobs() {
            let edges = index.edges_for_job(&job.name).len();
            let hash = job.hash.get(..12).unwrap_or(&job.hash);
            println!("  {} {} {}", job.name.green(), format!("({edges} references)").dimmed(), hash.dimmed());
            listed.push(json!({ "file": file.path, "job": job.name, "hash": job.hash, "references": edges }));
        }
    }
    println!();
    println!("{} jobs, {} references", listed.len(), index.len());

    let mut report = Report::new().with_metadata(json!({ "jobs": listed }));
    report.summary.jobs_checked = listed.len();
    write_report(session, &report)
}

/// Impact command - every referencing record, then the jobs downstream
fn impact_command(
    session: &Session,
    inputs: &[PathBuf],
    table: &PhysicalReference,
    column: Option<&str>,
    levels: usize,
) -> Result<()> {
    let loaded = load_exports(session, inputs)?;
    let index = DependencyIndex::build(documents(&loaded), &session.options);

    let schema = table.schema.as_deref().unwrap_or_default();
    let (target, edges) = match column {
        Some(column) => (
            PhysicalReference::column(schema, &table.table, column),
            index.find_by_column(schema, &table.table, column),
        ),
        None => (table.clone(), index.find_table(table)),
    };

    print_header("Impact Analysis");
    println!("{} {}", "Object:".bold(), target.to_string().green());
    println!("{} {}", "References:".bold(), edges.len());
    println!();

    for edge in &edges {
        let ambiguous = if edge.ambiguous { " (unqualified)".yellow().to_string() } else { String::new() };
        println!(
            "  {} {} line {} {}={} [{}, {}]{}",
            edge.job.green(),
            edge.record_path,
            edge.line,
            edge.property.cyan(),
            edge.reference,
            edge.usage,
            edge.confidence,
            ambiguous
        );
    }

    let downstream = trace_impact(&index, table, levels);
    if !downstream.is_empty() {
        println!();
        println!("{}", "Downstream jobs:".bold());
        for level in &downstream {
            for job in &level.jobs {
                let writes: Vec<String> = job.writes.iter().map(ToString::to_string).collect();
                let writes = if writes.is_empty() { "-".to_string() } else { writes.join(", ") };
                println!("  {} {} -> {}", format!("L{}", level.level).dimmed(), job.job.yellow(), writes);
            }
        }
    }

    let report = Report::new().with_metadata(json!({
        "object": target,
        "edges": edges,
        "downstream": downstream,
        "index_generation": index.generation(),
    }));
    write_report(session, &report)
}

/// Rename and replace commands - rewrite files, backing up each original
fn replace_command(session: &Session, inputs: &[PathBuf], request: ReplacementRequest, dry_run: bool) -> Result<()> {
    print_header(&request.to_string());

    let mut changelog = Vec::new();
    let mut files_changed = 0;
    let mut skipped = 0;
    for path in collect_inputs(inputs)? {
        let text = read_export(&path)?;
        let rewrite = rewrite::rewrite_file(&path, text, &request, &session.options);

        for (job, reason) in &rewrite.skipped {
            eprintln!("{} {} in {}: {}", "skipped".red(), job, path.display(), reason);
        }
        skipped += rewrite.skipped.len();
        if !rewrite.is_changed() {
            continue;
        }

        println!("{}", path.display().to_string().bold());
        for entry in rewrite.changelog() {
            println!("  {entry}");
        }
        if dry_run {
            println!("  {}", "dry run, not written".dimmed());
        } else {
            let backup = rewrite::write_with_backup(&rewrite, &session.config.backup_suffix)?;
            println!("  {} {}", "backup:".dimmed(), backup.display());
        }

        files_changed += 1;
        changelog.extend(rewrite.changelog().cloned());
    }

    println!();
    if changelog.is_empty() {
        println!("{}", "No references found, nothing to change".yellow());
    } else {
        println!("{} {} value(s) in {} file(s)", "Changed".green(), changelog.len(), files_changed);
    }

    let report = Report::new().with_metadata(json!({
        "request": request,
        "dry_run": dry_run,
        "changelog": changelog,
        "skipped_jobs": skipped,
    }));
    write_report(session, &report)
}

/// Delete-column command - advisory only
fn delete_column_command(session: &Session, inputs: &[PathBuf], table: &PhysicalReference, column: &str) -> Result<()> {
    let loaded = load_exports(session, inputs)?;
    let reference = PhysicalReference::column(table.schema.as_deref().unwrap_or_default(), &table.table, column);

    print_header("Column Deletion Advisory");
    let mut advisories = Vec::new();
    for document in documents(&loaded) {
        let advisory = plan_column_deletion(document, &reference, &session.options);
        if advisory.locations.is_empty() {
            continue;
        }
        println!("{} {}", advisory.job.yellow().bold(), advisory.message);
        for location in &advisory.locations {
            println!("  {location}");
        }
        advisories.push(advisory);
    }

    if advisories.is_empty() {
        println!("{}", format!("No job references {reference}").green());
    } else {
        println!();
        println!("{}", "Update these jobs before dropping the column.".yellow().bold());
    }

    let report = Report::new().with_metadata(json!({ "column": reference, "advisories": advisories }));
    write_report(session, &report)
}

async fn describe(catalog_path: &Path, table: &PhysicalReference) -> Result<PhysicalTable> {
    let catalog = SnapshotCatalog::from_file(catalog_path)?;
    catalog
        .describe_table(&TableIdentifier::from(table))
        .await
        .with_context(|| format!("{} catalog has no table {table}", catalog.name()))
}

/// Jobs in `loaded` that declare columns for `physical`
fn job_metadata(loaded: &[LoadedExport], physical: &PhysicalTable, options: &IndexOptions) -> Vec<JobTableMetadata> {
    let reference = physical.reference();
    documents(loaded)
        .filter_map(|document| JobTableMetadata::from_document(document, &reference, options))
        .collect()
}

/// Validate command - job metadata against the catalog
async fn validate_command(
    session: &Session,
    inputs: &[PathBuf],
    catalog: &Path,
    table: &PhysicalReference,
) -> Result<()> {
    let physical = describe(catalog, table).await?;
    let loaded = load_exports(session, inputs)?;
    let jobs = job_metadata(&loaded, &physical, &session.options);

    let issues: Vec<IntegrityIssue> = jobs.iter().flat_map(|job| validate(job, &physical)).collect();

    let mut report = Report::from_issues(issues);
    report.summary.jobs_checked = jobs.len();
    report.summary.tables_checked = 1;

    print_header("Integrity Validation");
    println!("{} {} ({} jobs)", "Table:".bold(), physical.qualified_name().green(), jobs.len());
    print_issues(&report.issues);
    write_report(session, &report)?;

    if report.has_blocking() {
        std::process::exit(1);
    }
    Ok(())
}

/// Plan-ddl command - gate the change on every job using the table
async fn plan_ddl_command(
    session: &Session,
    inputs: &[PathBuf],
    catalog: &Path,
    table: &PhysicalReference,
    change: &ColumnChange,
    script: Option<&Path>,
) -> Result<()> {
    let physical = describe(catalog, table).await?;
    let loaded = load_exports(session, inputs)?;
    let jobs = job_metadata(&loaded, &physical, &session.options);

    let issues: Vec<IntegrityIssue> = jobs
        .iter()
        .flat_map(|job| validate_change(job, &physical, change))
        .collect();

    print_header("DDL Plan");
    let planner = dsxlens_engine::DdlPlanner::new(session.config.dialect);
    let plan = match planner.plan_checked(&issues, &physical, change) {
        Ok(plan) => plan,
        Err(blocked) => {
            println!("{} {}", "Refused:".red().bold(), blocked);
            print_issues(&blocked.blocking);

            let mut report = Report::from_issues(issues);
            report.summary.jobs_checked = jobs.len();
            report.summary.tables_checked = 1;
            write_report(session, &report)?;
            std::process::exit(1);
        }
    };

    if plan.is_empty() {
        println!("{}", "The change does not alter the column, nothing to run".yellow());
    }
    for step in &plan.steps {
        println!("{} {}", format!("{:>2}.", step.index).dimmed(), step.statement());
        println!("    {} {}", step.phase.to_string().dimmed(), format!("requires: {}", step.precondition).dimmed());
    }
    if !plan.warnings.is_empty() {
        println!();
        print_issues(&plan.warnings);
    }

    if let Some(path) = script {
        std::fs::write(path, plan.to_script()).with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("{} {}", "Script saved to:".green(), path.display());
    }

    let mut report = Report::from_issues(plan.warnings.clone()).with_metadata(json!({ "plan": plan }));
    report.summary.jobs_checked = jobs.len();
    report.summary.tables_checked = 1;
    write_report(session, &report)
}

/// Classify command - SQLSTATE and kill events in a log
fn classify_command(session: &Session, log: &Path) -> Result<()> {
    let text = std::fs::read_to_string(log).with_context(|| format!("Failed to read {}", log.display()))?;
    let classifier = ErrorClassifier::new(session.config.classifier.clone());
    let events = classifier.classify(&text);
    let summary = summarize(&events);

    print_header("Error Classification");
    for event in &events {
        let severity = match event.severity {
            EventSeverity::Critical => event.severity.to_string().red().bold(),
            EventSeverity::Error => event.severity.to_string().red(),
            EventSeverity::Warning => event.severity.to_string().yellow(),
            EventSeverity::Info => event.severity.to_string().normal(),
        };
        let table = event.table.as_deref().map(|t| format!(" on {t}")).unwrap_or_default();
        println!(
            "  {} {} {} {}{}",
            format!("line {:>4}", event.line).dimmed(),
            severity,
            event.code.bold(),
            event.category,
            table
        );
    }

    println!();
    println!("{} {}", "Events:".bold(), summary.total);
    for (severity, count) in &summary.by_severity {
        println!("  {severity}: {count}");
    }
    let repeated: Vec<_> = summary.repeated().collect();
    if !repeated.is_empty() {
        println!("{}", "Repeated:".bold());
        for group in repeated {
            let table = group.table.as_deref().unwrap_or("-");
            println!("  {} x{} ({}, first on line {})", group.code, group.count, table, group.first_line);
        }
    }
    if !summary.recommendations.is_empty() {
        println!("{}", "Recommendations:".bold());
        for advice in &summary.recommendations {
            println!("  - {advice}");
        }
    }
    if summary.critical() > 0 {
        println!();
        println!("{}", format!("{} critical event(s)", summary.critical()).red().bold());
    }

    let report = Report::new().with_metadata(json!({ "events": events, "summary": summary }));
    write_report(session, &report)
}

fn print_issues(issues: &[IntegrityIssue]) {
    if issues.is_empty() {
        println!("{}", "✓ No issues found".green().bold());
        return;
    }

    let blocking = issues.iter().filter(|i| i.severity == Severity::Blocking).count();
    println!("{} {}  {} {}", "Blocking:".red().bold(), blocking, "Warnings:".yellow().bold(), issues.len() - blocking);
    println!();

    for issue in issues {
        let label = match issue.severity {
            Severity::Blocking => "BLOCKING".red().bold(),
            Severity::Warning => "WARNING".yellow().bold(),
        };
        println!("{} [{}] {}.{}: {}", label, issue.kind, issue.table, issue.column, issue.detail);
        if let (Some(job), Some(physical)) = (&issue.job_value, &issue.physical_value) {
            println!("  job: {}  database: {}", job.cyan(), physical.cyan());
        }
        if let Some(location) = &issue.location {
            println!("  at {location}");
        }
        if let Some(recommendation) = &issue.recommendation {
            println!("  {} {}", "→".green(), recommendation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn table_arguments() {
        assert_eq!(parse_table("ERP.ORDERS").unwrap(), PhysicalReference::table("ERP", "ORDERS"));
        assert_eq!(parse_table("ORDERS").unwrap(), PhysicalReference::unqualified("ORDERS"));
        assert!(parse_table("A.B.C").is_err());
        assert!(parse_table(".ORDERS").is_err());

        assert_eq!(parse_qualified_table("erp.orders").unwrap(), PhysicalReference::table("ERP", "ORDERS"));
        assert!(parse_qualified_table("ORDERS").unwrap_err().contains("SCHEMA.TABLE"));
    }

    #[test]
    fn catalog_commands_reject_unqualified_tables() {
        let parsed = Cli::try_parse_from(["dsxlens", "validate", "jobs.dsx", "--catalog", "erp.json", "--table", "ORDERS"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["dsxlens", "validate", "jobs.dsx", "--catalog", "erp.json", "--table", "ERP.ORDERS"]);
        assert!(parsed.is_ok());
    }

    #[test]
    fn directories_expand_to_export_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.dsx"), "").unwrap();
        std::fs::write(dir.path().join("nested").join("a.DSX"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = collect_inputs(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["b.dsx".to_string(), format!("nested{}a.DSX", std::path::MAIN_SEPARATOR)]);

        assert!(collect_inputs(&[dir.path().join("missing.dsx")]).is_err());
    }

    #[test]
    fn fixture_directory_loads_every_job() {
        let session = Session {
            config: Config::default(),
            options: IndexOptions::default(),
            output: None,
            verbose: false,
        };
        let loaded = load_exports(&session, &[PathBuf::from("../../fixtures/exports/erp_jobs.dsx")]).unwrap();
        let names: Vec<&str> = documents(&loaded).map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["LOAD_ORDERS", "LOOKUP_CUSTOMERS", "ARCHIVE_ORDERS"]);
    }
}
