//! Version label to pack format mapping, scraped from an HTML table.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::{FormatCode, VersionEntry};
use crate::error::PackError;

pub const DEFAULT_SOURCE_URL: &str = "https://minecraft.wiki/w/Pack_format";

static TABLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static FOOTNOTE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]*\]").unwrap());

const DASHES: [char; 2] = ['\u{2013}', '\u{2014}'];

/// Immutable snapshot of the known versions.
///
/// Both label lists are sorted by descending format code, then by label. A
/// label belongs to at most one of them and always has a mapping entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionTable {
    mapping: BTreeMap<String, FormatCode>,
    release_labels: Vec<String>,
    snapshot_labels: Vec<String>,
    max_format_code: FormatCode,
}

impl VersionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a table from entries; the first entry for a label wins.
    pub fn from_entries(entries: impl IntoIterator<Item = VersionEntry>) -> Self {
        let mut builder = TableBuilder::default();
        for entry in entries {
            if builder.add_label(&entry.label, entry.format_code, entry.is_snapshot) {
                builder.observe_code(entry.format_code);
            }
        }
        builder.build()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty() && self.max_format_code == 0
    }

    pub fn mapping(&self) -> &BTreeMap<String, FormatCode> {
        &self.mapping
    }

    pub fn release_labels(&self) -> &[String] {
        &self.release_labels
    }

    pub fn snapshot_labels(&self) -> &[String] {
        &self.snapshot_labels
    }

    pub fn max_format_code(&self) -> FormatCode {
        self.max_format_code
    }

    pub fn format_code_of(&self, label: &str) -> Option<FormatCode> {
        self.mapping.get(label).copied()
    }

    pub fn is_valid_format(&self, code: FormatCode) -> bool {
        (1..=self.max_format_code).contains(&code)
    }

    /// Labels offered for selection: releases, plus snapshots when requested.
    pub fn active_labels(&self, include_snapshots: bool) -> Vec<String> {
        let mut labels = self.release_labels.clone();
        if include_snapshots {
            labels.extend(self.snapshot_labels.iter().cloned());
            sort_labels(&mut labels, &self.mapping);
        }
        labels
    }
}

#[derive(Default)]
struct TableBuilder {
    mapping: BTreeMap<String, FormatCode>,
    release_labels: Vec<String>,
    snapshot_labels: Vec<String>,
    max_format_code: FormatCode,
}

impl TableBuilder {
    fn observe_code(&mut self, code: FormatCode) {
        self.max_format_code = self.max_format_code.max(code);
    }

    /// Records `label` unless it is already known. Returns whether it was added.
    fn add_label(&mut self, label: &str, code: FormatCode, is_snapshot: bool) -> bool {
        if let Some(existing) = self.mapping.get(label) {
            if *existing != code {
                debug!(label, existing, code, "duplicate version label; keeping first");
            }
            return false;
        }
        self.mapping.insert(label.to_string(), code);
        if is_snapshot {
            self.snapshot_labels.push(label.to_string());
        } else {
            self.release_labels.push(label.to_string());
        }
        true
    }

    fn build(mut self) -> VersionTable {
        sort_labels(&mut self.release_labels, &self.mapping);
        sort_labels(&mut self.snapshot_labels, &self.mapping);
        VersionTable {
            mapping: self.mapping,
            release_labels: self.release_labels,
            snapshot_labels: self.snapshot_labels,
            max_format_code: self.max_format_code,
        }
    }
}

fn sort_labels(labels: &mut [String], mapping: &BTreeMap<String, FormatCode>) {
    labels.sort_by(|a, b| compare_labels(a, b, mapping));
}

fn compare_labels(a: &str, b: &str, mapping: &BTreeMap<String, FormatCode>) -> Ordering {
    let code_a = mapping.get(a).copied().unwrap_or_default();
    let code_b = mapping.get(b).copied().unwrap_or_default();
    code_b.cmp(&code_a).then_with(|| a.cmp(b))
}

/// Parses the first table whose rows carry a numeric format code.
///
/// Rows are handled independently: the first cell is the format code, the
/// second lists snapshot labels and the third lists release labels. Rows
/// without a numeric code are skipped.
#[instrument(skip_all, fields(bytes = html.len()))]
pub fn parse_table(html: &str) -> Result<VersionTable, PackError> {
    let document = Html::parse_document(html);
    let mut tables = document.select(&TABLE_SELECTOR).collect::<Vec<_>>();
    // Stable sort: wiki-styled tables first, document order otherwise.
    tables.sort_by_key(|table| !table.value().classes().any(|class| class == "wikitable"));

    for table in tables {
        let mut builder = TableBuilder::default();
        let mut parsed_rows = 0usize;
        for row in table.select(&ROW_SELECTOR) {
            let cells = row_cells(row);
            if cells.len() < 3 {
                continue;
            }
            let Some(code) = parse_format_code(&cells[0]) else {
                continue;
            };
            parsed_rows += 1;
            builder.observe_code(code);
            for label in split_labels(&cells[2]) {
                builder.add_label(&label, code, false);
            }
            for label in split_labels(&cells[1]) {
                builder.add_label(&label, code, true);
            }
        }
        if parsed_rows > 0 {
            let table = builder.build();
            info!(
                rows = parsed_rows,
                releases = table.release_labels.len(),
                snapshots = table.snapshot_labels.len(),
                max_format_code = table.max_format_code,
                "parsed version table"
            );
            return Ok(table);
        }
    }

    Err(PackError::VersionTableUnavailable(
        "no table with numeric format rows found".to_string(),
    ))
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .map(cell_text)
        .collect()
}

fn cell_text(cell: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in cell.descendants() {
        match node.value() {
            Node::Text(fragment) => text.push_str(&fragment.text),
            Node::Element(element) if element.name() == "br" => text.push(','),
            _ => {}
        }
    }
    FOOTNOTE_REGEX.replace_all(&text, "").into_owned()
}

fn parse_format_code(cell: &str) -> Option<FormatCode> {
    let trimmed = cell.trim();
    if let Ok(code) = trimmed.parse() {
        return Some(code);
    }
    let numbers = trimmed
        .split(|ch: char| !ch.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .count();
    if numbers > 1 {
        warn!(cell = trimmed, "row lists several format codes; skipping");
    }
    None
}

fn split_labels(cell: &str) -> Vec<String> {
    normalize_dashes(cell)
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty() && *label != "-")
        .map(str::to_string)
        .collect()
}

/// Replaces en and em dashes with an ASCII hyphen.
pub fn normalize_dashes(value: &str) -> String {
    value.replace(DASHES, "-")
}

/// Where the version document comes from.
pub trait DocumentSource: Send + Sync {
    fn fetch_document(&self, uri: &str) -> Result<String, PackError>;
}

#[derive(Clone)]
pub struct HttpDocumentSource {
    client: Client,
}

impl HttpDocumentSource {
    pub fn new() -> Result<Self, PackError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("packshift/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PackError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PackError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl DocumentSource for HttpDocumentSource {
    fn fetch_document(&self, uri: &str) -> Result<String, PackError> {
        let response = self
            .client
            .get(uri)
            .send()
            .map_err(|err| PackError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .map(|body| body.chars().take(200).collect())
                .unwrap_or_else(|_| "version table request failed".to_string());
            return Err(PackError::HttpStatus { status, message });
        }
        response
            .text()
            .map_err(|err| PackError::Http(err.to_string()))
    }
}

/// Reads a saved copy of the version page from disk; `uri` is a path.
#[derive(Clone, Copy, Default)]
pub struct FileDocumentSource;

impl DocumentSource for FileDocumentSource {
    fn fetch_document(&self, uri: &str) -> Result<String, PackError> {
        fs::read_to_string(uri).map_err(|err| PackError::Filesystem(format!("read {uri}: {err}")))
    }
}

/// Outcome of one resolve attempt. `table` is empty whenever `error` is set.
#[derive(Debug)]
pub struct Resolution {
    pub table: VersionTable,
    pub error: Option<PackError>,
}

impl Resolution {
    pub fn is_available(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Resolver<S: DocumentSource> {
    source: S,
}

impl<S: DocumentSource> Resolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Fetches and parses the version document once. Never fails: problems
    /// are reported in [`Resolution::error`] alongside an empty table.
    pub fn resolve(&self, uri: &str) -> Resolution {
        let parsed = self
            .source
            .fetch_document(uri)
            .and_then(|html| parse_table(&html));
        match parsed {
            Ok(table) => Resolution { table, error: None },
            Err(err) => {
                let err = match err {
                    PackError::VersionTableUnavailable(_) => err,
                    other => PackError::VersionTableUnavailable(other.to_string()),
                };
                warn!(uri, error = %err, "version table unavailable");
                Resolution {
                    table: VersionTable::empty(),
                    error: Some(err),
                }
            }
        }
    }
}
