use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use trac2moin_core::filesystem::normalize_path;
use trac2moin_core::identmap::{IdentifierMap, load_identifier_map};
use trac2moin_core::migrate::{MigrationReport, MigrationSettings, run_migration};
use trac2moin_core::runtime::{ResolutionContext, ResolvedRun, RunOverrides, resolve_run};
use trac2moin_core::source::TracDatabase;
use trac2moin_core::translate::Translator;
use trac2moin_core::verify::{VerifyReport, verify_output};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "trac2moin",
    version,
    about = "Convert a Trac wiki into a MoinMoin page store"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved run diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Export every mapped page and attachment")]
    Migrate(MigrateArgs),
    #[command(about = "Translate one document and print the result")]
    Translate(TranslateArgs),
    #[command(about = "Check an exported page store for layout problems")]
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(short = 't', long, value_name = "PATH", help = "Path to the Trac project")]
    trac: Option<PathBuf>,
    #[arg(short = 'o', long, value_name = "PATH", help = "Output path")]
    output: Option<PathBuf>,
    #[arg(short = 'n', long, value_name = "PATH", help = "File of oldname|newname lines")]
    namemap: Option<PathBuf>,
    #[arg(short = 'u', long, value_name = "PATH", help = "File of olduser|newuser lines")]
    usermap: Option<PathBuf>,
    #[arg(short = 'p', long, help = "Prefix for every page in the new wiki")]
    prefix: Option<String>,
    #[arg(
        short = 'i',
        long,
        help = "Fix up wiki syntax in every version instead of adding a final revision"
    )]
    inline_fixups: bool,
    #[arg(long, value_name = "NAME", help = "Author whose edits are not migrated")]
    exclude_author: Option<String>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct TranslateArgs {
    #[arg(value_name = "FILE", help = "Document to translate (stdin when omitted)")]
    file: Option<PathBuf>,
    #[arg(short = 'n', long, value_name = "PATH")]
    namemap: Option<PathBuf>,
    #[arg(short = 'p', long)]
    prefix: Option<String>,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Migrate(args)) => run_migrate(cli.config, cli.diagnostics, args),
        Some(Commands::Translate(args)) => run_translate(cli.config, cli.diagnostics, args),
        Some(Commands::Verify(args)) => run_verify(cli.config, cli.diagnostics, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_migrate(config: Option<PathBuf>, diagnostics: bool, args: MigrateArgs) -> Result<()> {
    let run = resolve(RunOverrides {
        config,
        trac: args.trac,
        output: args.output,
        namemap: args.namemap,
        usermap: args.usermap,
        prefix: args.prefix,
        inline_fixups: args.inline_fixups,
        exclude_author: args.exclude_author,
    })?;
    if diagnostics {
        println!("[diagnostics]\n{}\n", run.diagnostics());
    }
    let Some(trac_root) = run.trac_root.as_deref() else {
        println!("For usage: trac2moin migrate --help");
        println!();
        return Ok(());
    };

    let settings = MigrationSettings::load(&run)?;
    let source = TracDatabase::open(trac_root)?;
    let report = run_migration(&source, &settings)?;

    if args.json {
        print_json(&report)?;
    } else {
        print_migration_report(&run, &settings, &report);
    }
    Ok(())
}

fn run_translate(config: Option<PathBuf>, diagnostics: bool, args: TranslateArgs) -> Result<()> {
    let run = resolve(RunOverrides {
        config,
        namemap: args.namemap,
        prefix: args.prefix,
        ..RunOverrides::default()
    })?;
    if diagnostics {
        eprintln!("[diagnostics]\n{}\n", run.diagnostics());
    }
    let page_map = match run.namemap_path.as_deref() {
        Some(path) => load_identifier_map(path)?,
        None => IdentifierMap::default(),
    };
    let content = match args.file.as_deref() {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => io::read_to_string(io::stdin()).context("failed to read stdin")?,
    };

    let translator = Translator::new(&page_map, &run.prefix)?;
    print!("{}", translator.translate(&content));
    Ok(())
}

fn run_verify(config: Option<PathBuf>, diagnostics: bool, args: VerifyArgs) -> Result<()> {
    let run = resolve(RunOverrides {
        config,
        output: args.output,
        ..RunOverrides::default()
    })?;
    if diagnostics {
        println!("[diagnostics]\n{}\n", run.diagnostics());
    }
    let report = verify_output(&run.output_dir)?;

    if args.json {
        print_json(&report)?;
    } else {
        print_verify_report(&report);
    }
    if !report.issues.is_empty() {
        bail!(
            "verification found {} issue(s) in {}",
            report.issues.len(),
            report.output_dir
        );
    }
    Ok(())
}

fn resolve(overrides: RunOverrides) -> Result<ResolvedRun> {
    let context = ResolutionContext::from_process()?;
    resolve_run(&context, &overrides)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_migration_report(run: &ResolvedRun, settings: &MigrationSettings, report: &MigrationReport) {
    println!("migration complete");
    println!(
        "trac_root: {}",
        run.trac_root
            .as_deref()
            .map(normalize_path)
            .unwrap_or_default()
    );
    println!("output_dir: {}", report.output_dir);
    println!("prefix: {}", if run.prefix.is_empty() { "<none>" } else { &run.prefix });
    println!("inline_fixups: {}", format_flag(run.inline_fixups));
    println!("namemap.entries: {}", settings.page_map.len());
    println!("namemap.excluded: {}", settings.page_map.excluded_count());
    println!("usermap.entries: {}", settings.user_map.len());
    println!("pages.seen: {}", report.pages_seen);
    println!("pages.skipped: {}", report.pages_skipped);
    println!("pages.without_versions: {}", report.pages_without_versions);
    println!("pages.exported: {}", report.pages_exported);
    println!("revisions.written: {}", report.revisions_written);
    println!("revisions.fixup: {}", report.fixup_revisions);
    println!("attachments.seen: {}", report.attachments_seen);
    println!("attachments.copied: {}", report.attachments_copied);
    println!(
        "attachments.ticket_skipped: {}",
        report.ticket_attachments_skipped
    );
    println!("attachments.skipped: {}", report.attachments_skipped);
}

fn print_verify_report(report: &VerifyReport) {
    println!("verify");
    println!("output_dir: {}", report.output_dir);
    println!("pages: {}", report.pages);
    println!("revisions: {}", report.revisions);
    println!("attachments: {}", report.attachments);
    println!("log_entries: {}", report.log_entries);
    println!("issues.count: {}", report.issues.len());
    if report.issues.is_empty() {
        println!("issues: <none>");
    } else {
        for issue in &report.issues {
            println!("issues.{}: {}", issue.page, issue.message);
        }
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
