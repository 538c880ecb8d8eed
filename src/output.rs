use std::io::{self, Write};

use serde::Serialize;

use crate::archive::ScanReport;
use crate::domain::{FormatCode, VersionEntry};
use crate::pipeline::{ConversionPlan, ConversionResult, ProgressEvent, ProgressSink};
use crate::session::TableState;
use crate::versions::VersionTable;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsReport {
    pub table: TableState,
    pub max_format_code: FormatCode,
    pub versions: Vec<VersionEntry>,
}

impl VersionsReport {
    pub fn new(state: &TableState, table: &VersionTable, include_snapshots: bool) -> Self {
        let active = table.active_labels(include_snapshots);
        let versions = active
            .iter()
            .filter_map(|label| {
                table.format_code_of(label).map(|code| VersionEntry {
                    label: label.clone(),
                    format_code: code,
                    is_snapshot: table.snapshot_labels().contains(label),
                })
            })
            .collect();
        Self {
            table: state.clone(),
            max_format_code: table.max_format_code(),
            versions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertReport {
    pub dry_run: bool,
    pub plan: Option<ConversionPlan>,
    pub result: Option<ConversionResult>,
    pub written: Vec<String>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_versions(report: &VersionsReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_scan(report: &ScanReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_convert(report: &ConvertReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Prints stage changes to stderr while a conversion runs.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";
        let color = if event.failed { red } else { cyan };
        eprintln!("{color}[{}]{reset} {}", event.stage, event.message);
    }
}

pub fn print_versions_summary(report: &VersionsReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    match &report.table {
        TableState::Ready { fetched_at, .. } => {
            println!(
                "{green}{} versions, latest pack format {} (fetched {}){reset}",
                report.versions.len(),
                report.max_format_code,
                fetched_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        TableState::Pending => println!("{yellow}version table still loading{reset}"),
        TableState::Failed { error } => println!("{yellow}version table unavailable: {error}{reset}"),
    }
    for entry in &report.versions {
        let marker = if entry.is_snapshot { " (snapshot)" } else { "" };
        println!("  {:>3}  {}{marker}", entry.format_code, entry.label);
    }
}

pub fn print_scan_summary(name: &str, report: &ScanReport) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    if report.valid {
        println!("{green}valid resource pack: {name}{reset}");
        if let Some(code) = report.format_code {
            println!("  pack_format: {code}");
        }
        if let Some(description) = &report.description {
            println!("  description: {description}");
        }
    } else {
        println!(
            "{red}not a resource pack: {name} ({}){reset}",
            report.problem.as_deref().unwrap_or("unknown problem")
        );
    }
    println!("  entries: {}", report.entries);
}

pub fn print_convert_summary(report: &ConvertReport) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    if let Some(plan) = &report.plan {
        println!("{cyan}planned outputs (dry run):{reset}");
        for output in &plan.outputs {
            println!("  {} (format {})", output.filename, output.format_code);
        }
        if let Some(bundle) = &plan.bundle_name {
            println!("  bundle: {bundle}");
        }
    }
    for path in &report.written {
        println!("{green}wrote {path}{reset}");
    }
}
