use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use packshift::archive;
use packshift::config::{ConfigLoader, ResolvedConfig};
use packshift::domain::ConversionTarget;
use packshift::error::PackError;
use packshift::output::{
    ConsoleProgress, ConvertReport, JsonOutput, OutputMode, VersionsReport, print_convert_summary,
    print_scan_summary, print_versions_summary,
};
use packshift::pipeline::{ConversionOptions, ConversionRequest, ProgressSink};
use packshift::session::{Session, TableState};
use packshift::store::OutputStore;
use packshift::versions::{FileDocumentSource, HttpDocumentSource, Resolver};

#[derive(Parser)]
#[command(name = "packshift")]
#[command(about = "Retarget resource packs to other game versions by rewriting pack.mcmeta")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Config file (defaults to ./packshift.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// URL of the page holding the pack format table
    #[arg(long, global = true)]
    source: Option<String>,

    /// Read the pack format table from a saved HTML page instead
    #[arg(long, global = true, conflicts_with = "source")]
    table_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List known versions and their pack formats")]
    Versions(VersionsArgs),
    #[command(about = "Check whether a file is a resource pack")]
    Check(CheckArgs),
    #[command(about = "Convert a resource pack to one or more pack formats")]
    Convert(ConvertArgs),
}

#[derive(Args)]
struct VersionsArgs {
    #[arg(long)]
    snapshots: bool,
}

#[derive(Args)]
struct CheckArgs {
    file: PathBuf,
}

#[derive(Args)]
struct ConvertArgs {
    file: PathBuf,

    /// Target pack format, entered directly
    #[arg(long, conflicts_with_all = ["label", "from", "to"])]
    format: Option<u32>,

    /// Target version label, e.g. 1.20.1
    #[arg(long, conflicts_with_all = ["from", "to"])]
    label: Option<String>,

    /// First version of an inclusive range
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// Last version of an inclusive range
    #[arg(long, requires = "from")]
    to: Option<String>,

    #[arg(long)]
    snapshots: bool,

    #[arg(long)]
    smart_naming: bool,

    /// Wrap range outputs in a single zip
    #[arg(long)]
    bundle: bool,

    #[arg(long)]
    out_dir: Option<String>,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PackError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PackError) -> u8 {
    match error {
        PackError::InvalidTargetSelection(_)
        | PackError::AmbiguousFilenameVersion { .. }
        | PackError::ManifestEntryNotFound(_)
        | PackError::MissingFormatField
        | PackError::MalformedManifest(_) => 2,
        PackError::VersionTableUnavailable(_)
        | PackError::Http(_)
        | PackError::HttpStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(source) = cli.source {
        config.source_url = source;
    }
    let table_file = cli.table_file;

    let mut session = Session::new();
    match cli.command {
        Commands::Versions(args) => {
            refresh_table(&mut session, &config, table_file.as_deref())?;
            run_versions(&session, args, &config, output_mode)
        }
        Commands::Check(args) => run_check(args, output_mode),
        Commands::Convert(args) => {
            run_convert(&mut session, args, &config, table_file.as_deref(), output_mode)
        }
    }
}

fn refresh_table(
    session: &mut Session,
    config: &ResolvedConfig,
    table_file: Option<&str>,
) -> miette::Result<()> {
    match table_file {
        Some(path) => {
            session.refresh(&Resolver::new(FileDocumentSource), path);
        }
        None => {
            let source = HttpDocumentSource::new()?;
            session.refresh(&Resolver::new(source), &config.source_url);
        }
    }
    Ok(())
}

fn run_versions(
    session: &Session,
    args: VersionsArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let include_snapshots = args.snapshots || config.options.include_snapshots;
    let report = VersionsReport::new(session.table_state(), &session.table(), include_snapshots);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_versions(&report).into_diagnostic()?,
        OutputMode::Interactive => print_versions_summary(&report),
    }
    if let TableState::Failed { error } = session.table_state() {
        return Err(PackError::VersionTableUnavailable(error.clone()).into());
    }
    Ok(())
}

fn run_check(args: CheckArgs, output_mode: OutputMode) -> miette::Result<()> {
    let bytes = read_input(&args.file)?;
    let report = archive::scan(&bytes)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_scan(&report).into_diagnostic()?,
        OutputMode::Interactive => print_scan_summary(&display_name(&args.file), &report),
    }
    Ok(())
}

fn run_convert(
    session: &mut Session,
    args: ConvertArgs,
    config: &ResolvedConfig,
    table_file: Option<&str>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let options = ConversionOptions {
        include_snapshots: args.snapshots || config.options.include_snapshots,
        smart_naming: args.smart_naming || config.options.smart_naming,
        bundle: args.bundle || config.options.bundle,
    };

    let bytes = read_input(&args.file)?;
    let generation = session
        .select_file(display_name(&args.file), bytes)
        .generation;

    refresh_table(session, config, table_file)?;
    if let TableState::Failed { error } = session.table_state() {
        return Err(PackError::VersionTableUnavailable(error.clone()).into());
    }
    let pipeline = session.pipeline();

    let target = match (args.format, args.label, args.from, args.to) {
        (Some(code), None, None, None) => ConversionTarget::format(code),
        (None, Some(label), None, None) => pipeline
            .single_for_label(&label, options.include_snapshots)?,
        (None, None, Some(from), Some(to)) => ConversionTarget::range(from, to),
        _ => {
            return Err(PackError::InvalidTargetSelection(
                "pass --format, --label, or --from with --to".to_string(),
            )
            .into());
        }
    };

    let selection = session
        .selection()
        .cloned()
        .ok_or_else(|| miette::Report::msg("no file selected"))?;

    if args.dry_run {
        let plan = pipeline.plan(&selection.name, &target, options)?;
        let report = ConvertReport {
            dry_run: true,
            plan: Some(plan),
            result: None,
            written: Vec::new(),
        };
        return print_convert(&report, output_mode);
    }

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &ConsoleProgress,
    };
    let request = ConversionRequest {
        filename: &selection.name,
        archive: &selection.bytes,
        target,
        options,
    };
    let result = pipeline.run(&request, sink)?;
    let Some(result) = session.accept(generation, result) else {
        return Err(miette::Report::msg("file selection changed; result discarded"));
    };

    let out_dir = args
        .out_dir
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| config.output_dir.clone());
    let written = OutputStore::new(out_dir)
        .deliver(&result)?
        .into_iter()
        .map(|path| path.to_string())
        .collect();
    let report = ConvertReport {
        dry_run: false,
        plan: None,
        result: Some(result),
        written,
    };
    print_convert(&report, output_mode)
}

fn print_convert(report: &ConvertReport, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_convert(report).into_diagnostic()?,
        OutputMode::Interactive => print_convert_summary(report),
    }
    Ok(())
}

fn read_input(path: &Path) -> miette::Result<Vec<u8>> {
    let bytes = fs::read(path)
        .map_err(|err| PackError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(bytes)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
