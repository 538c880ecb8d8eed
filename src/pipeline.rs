use std::cell::Cell;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::{self, ArchiveBuilder, SourceArchive};
use crate::domain::{ConversionTarget, FormatCode};
use crate::error::PackError;
use crate::manifest::{self, MANIFEST_PATH};
use crate::naming::{self, base_version_of, detect_versions, file_stem, sanitize_component};
use crate::versions::VersionTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub include_snapshots: bool,
    pub smart_naming: bool,
    pub bundle: bool,
}

#[derive(Debug, Clone)]
pub struct ConversionRequest<'a> {
    pub filename: &'a str,
    pub archive: &'a [u8],
    pub target: ConversionTarget,
    pub options: ConversionOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Validating,
    Loading,
    IteratingVersions,
    Patching,
    Finalizing,
    Bundling,
    Ready,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "Idle",
            Stage::Validating => "Validating",
            Stage::Loading => "Loading",
            Stage::IteratingVersions => "IteratingVersions",
            Stage::Patching => "Patching",
            Stage::Finalizing => "Finalizing",
            Stage::Bundling => "Bundling",
            Stage::Ready => "Ready",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    pub failed: bool,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOutput {
    pub filename: String,
    pub format_code: FormatCode,
    pub label: Option<String>,
}

/// Validated targets and output names for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionPlan {
    pub outputs: Vec<PlannedOutput>,
    pub bundle_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub filename: String,
    pub format_code: Option<FormatCode>,
    pub label: Option<String>,
    pub size: usize,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub outputs: Vec<ConversionOutput>,
    pub bundle: Option<ConversionOutput>,
}

impl ConversionResult {
    /// What should be handed to the user: the bundle when one was built,
    /// otherwise every output.
    pub fn deliverables(&self) -> Vec<&ConversionOutput> {
        match &self.bundle {
            Some(bundle) => vec![bundle],
            None => self.outputs.iter().collect(),
        }
    }
}

/// Batch conversion over a shared, read-only version table.
#[derive(Debug, Clone)]
pub struct Pipeline {
    table: Arc<VersionTable>,
}

impl Pipeline {
    pub fn new(table: Arc<VersionTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &VersionTable {
        &self.table
    }

    /// Single target for a label from the active list.
    pub fn single_for_label(
        &self,
        label: &str,
        include_snapshots: bool,
    ) -> Result<ConversionTarget, PackError> {
        self.ensure_table()?;
        let label = crate::versions::normalize_dashes(label.trim());
        if !self
            .table
            .active_labels(include_snapshots)
            .contains(&label)
        {
            return Err(PackError::InvalidTargetSelection(format!(
                "{label} is not in the active version list"
            )));
        }
        let format_code = self.table.format_code_of(&label).ok_or_else(|| {
            PackError::InvalidTargetSelection(format!("{label} has no pack format"))
        })?;
        Ok(ConversionTarget::labelled(format_code, label))
    }

    /// Validates `target` and works out every output name without touching
    /// the archive.
    pub fn plan(
        &self,
        filename: &str,
        target: &ConversionTarget,
        options: ConversionOptions,
    ) -> Result<ConversionPlan, PackError> {
        let stem = file_stem(filename);
        let detected = detect_versions(stem);

        match target {
            ConversionTarget::Single { format_code, label } => {
                self.ensure_table()?;
                if !self.table.is_valid_format(*format_code) {
                    return Err(PackError::InvalidTargetSelection(format!(
                        "format {format_code} is outside 1..={}",
                        self.table.max_format_code()
                    )));
                }
                if options.smart_naming && detected.len() > 1 {
                    return Err(PackError::AmbiguousFilenameVersion {
                        filename: filename.to_string(),
                        versions: detected.into_iter().collect(),
                    });
                }
                let representative = label.as_deref().map(base_version_of);
                let filename = output_name(
                    stem,
                    &detected,
                    options.smart_naming,
                    label.as_deref(),
                    representative.as_deref(),
                    *format_code,
                );
                Ok(ConversionPlan {
                    outputs: vec![PlannedOutput {
                        filename,
                        format_code: *format_code,
                        label: label.clone(),
                    }],
                    bundle_name: None,
                })
            }
            ConversionTarget::Range { from, to } => {
                let labels = self.range_labels(from, to, options.include_snapshots)?;
                let mut used = HashSet::new();
                let mut outputs = Vec::with_capacity(labels.len());
                for label in &labels {
                    let format_code = self.table.format_code_of(label).ok_or_else(|| {
                        PackError::InvalidTargetSelection(format!("{label} has no pack format"))
                    })?;
                    let representative = base_version_of(label);
                    let filename = unique_name(
                        output_name(
                            stem,
                            &detected,
                            options.smart_naming,
                            Some(label.as_str()),
                            Some(representative.as_str()),
                            format_code,
                        ),
                        format_code,
                        &mut used,
                    );
                    outputs.push(PlannedOutput {
                        filename,
                        format_code,
                        label: Some(label.clone()),
                    });
                }
                let bundle_name = options.bundle.then(|| {
                    // Active lists run newest first, so the oldest is last.
                    let oldest = labels.last().map(|label| base_version_of(label));
                    bundle_name(stem, &detected, options.smart_naming, oldest.as_deref())
                });
                Ok(ConversionPlan {
                    outputs,
                    bundle_name,
                })
            }
        }
    }

    /// Runs the whole conversion. Either every output is produced or the run
    /// fails and nothing is returned.
    pub fn run(
        &self,
        request: &ConversionRequest<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<ConversionResult, PackError> {
        let tracker = StageTracker::new(sink);
        let result = self.execute(request, &tracker);
        match &result {
            Ok(result) => {
                tracker.enter(
                    Stage::Ready,
                    format!("{} archive(s) ready", result.deliverables().len()),
                );
                info!(
                    file = request.filename,
                    conversion = %request.target,
                    outputs = result.outputs.len(),
                    bundled = result.bundle.is_some(),
                    "conversion finished"
                );
            }
            Err(err) => {
                let stage = tracker.current();
                warn!(file = request.filename, %stage, error = %err, "conversion failed");
                sink.event(ProgressEvent {
                    stage,
                    message: format!("failed during {stage}: {err}"),
                    failed: true,
                });
            }
        }
        result
    }

    fn execute(
        &self,
        request: &ConversionRequest<'_>,
        tracker: &StageTracker<'_>,
    ) -> Result<ConversionResult, PackError> {
        tracker.enter(Stage::Validating, format!("checking {}", request.target));
        let plan = self.plan(request.filename, &request.target, request.options)?;

        tracker.enter(Stage::Loading, format!("reading {MANIFEST_PATH}"));
        let source = SourceArchive::open(request.archive)?;
        if !source.contains(MANIFEST_PATH) {
            return Err(PackError::ManifestEntryNotFound(MANIFEST_PATH.to_string()));
        }
        let payload = manifest::decode(&source.read_file(MANIFEST_PATH)?)?;
        let entries = source.read_entries()?;

        if request.target.is_range() {
            tracker.enter(
                Stage::IteratingVersions,
                format!("{} versions", plan.outputs.len()),
            );
        }

        let mut outputs = Vec::with_capacity(plan.outputs.len());
        for planned in &plan.outputs {
            tracker.enter(
                Stage::Patching,
                format!("pack_format {} -> {}", payload.format_code(), planned.format_code),
            );
            let manifest_bytes = manifest::encode(&payload, planned.format_code)?;

            tracker.enter(Stage::Finalizing, planned.filename.clone());
            let bytes = archive::transform_entries(&entries, &manifest_bytes)?;
            outputs.push(ConversionOutput {
                filename: planned.filename.clone(),
                format_code: Some(planned.format_code),
                label: planned.label.clone(),
                size: bytes.len(),
                bytes,
            });
        }

        let bundle = match &plan.bundle_name {
            Some(name) => {
                tracker.enter(Stage::Bundling, name.clone());
                let mut builder = ArchiveBuilder::new();
                for output in &outputs {
                    builder.add_file(&output.filename, &output.bytes)?;
                }
                let bytes = builder.finalize()?;
                Some(ConversionOutput {
                    filename: name.clone(),
                    format_code: None,
                    label: None,
                    size: bytes.len(),
                    bytes,
                })
            }
            None => None,
        };

        Ok(ConversionResult { outputs, bundle })
    }

    fn ensure_table(&self) -> Result<(), PackError> {
        if self.table.is_empty() {
            return Err(PackError::VersionTableUnavailable(
                "no pack formats are known yet".to_string(),
            ));
        }
        Ok(())
    }

    fn range_labels(
        &self,
        from: &str,
        to: &str,
        include_snapshots: bool,
    ) -> Result<Vec<String>, PackError> {
        self.ensure_table()?;
        let active = self.table.active_labels(include_snapshots);
        let position = |label: &str| {
            let label = crate::versions::normalize_dashes(label.trim());
            active.iter().position(|candidate| *candidate == label).ok_or_else(|| {
                PackError::InvalidTargetSelection(format!(
                    "{label} is not in the active version list"
                ))
            })
        };
        let start = position(from)?;
        let end = position(to)?;
        let (low, high) = if start <= end { (start, end) } else { (end, start) };
        Ok(active[low..=high].to_vec())
    }
}

fn output_name(
    stem: &str,
    detected: &BTreeSet<String>,
    smart_naming: bool,
    label: Option<&str>,
    representative: Option<&str>,
    format_code: FormatCode,
) -> String {
    if smart_naming && naming::single(detected).is_some() {
        if let Some(representative) = representative {
            let replacement = sanitize_component(representative);
            return format!("{}.zip", naming::substitute(stem, detected, &replacement));
        }
    }
    match label {
        Some(label) => format!("{stem}_{}.zip", sanitize_component(label)),
        None => format!("{stem}_v{format_code}.zip"),
    }
}

fn bundle_name(
    stem: &str,
    detected: &BTreeSet<String>,
    smart_naming: bool,
    oldest: Option<&str>,
) -> String {
    match oldest {
        Some(oldest) if smart_naming && naming::single(detected).is_some() => format!(
            "{}.zip",
            naming::substitute(stem, detected, &sanitize_component(oldest))
        ),
        _ => format!("{stem}_bulk.zip"),
    }
}

fn unique_name(name: String, format_code: FormatCode, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let stem = file_stem(&name).to_string();
    let mut candidate = format!("{stem}_v{format_code}.zip");
    let mut counter = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{stem}_v{format_code}_{counter}.zip");
        counter += 1;
    }
    candidate
}

struct StageTracker<'a> {
    sink: &'a dyn ProgressSink,
    current: Cell<Stage>,
}

impl<'a> StageTracker<'a> {
    fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            current: Cell::new(Stage::Idle),
        }
    }

    fn enter(&self, stage: Stage, message: String) {
        self.current.set(stage);
        self.sink.event(ProgressEvent {
            stage,
            message,
            failed: false,
        });
    }

    fn current(&self) -> Stage {
        self.current.get()
    }
}
