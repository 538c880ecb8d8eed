use std::io::{Cursor, Read, Seek, Write};
use std::ops::Range;
use std::thread;

use serde::Serialize;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::domain::{ArchiveEntry, FormatCode};
use crate::error::PackError;
use crate::manifest::{self, MANIFEST_PATH};

const MAX_READERS: usize = 8;
/// Upper bound on buffer pre-allocation; declared sizes come from the zip header.
const MAX_PREALLOC: usize = 1 << 20;

/// Read-only view over a zip held in memory.
#[derive(Debug, Clone)]
pub struct SourceArchive<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> SourceArchive<'a> {
    pub fn open(bytes: &'a [u8]) -> Result<Self, PackError> {
        let archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_error)?;
        Ok(Self { archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    pub fn contains(&self, path: &str) -> bool {
        self.archive.index_for_name(path).is_some()
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, PackError> {
        let mut archive = self.archive.clone();
        let mut file = archive.by_name(path).map_err(archive_error)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|err| PackError::Archive(format!("read {path}: {err}")))?;
        Ok(contents)
    }

    /// Decodes every entry, spreading the work over scoped reader threads.
    ///
    /// Each reader owns a clone of the archive index over the same buffer, and
    /// all of them are joined before this returns. Entries come back in
    /// archive order.
    pub fn read_entries(&self) -> Result<Vec<ArchiveEntry>, PackError> {
        let count = self.archive.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        let readers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, MAX_READERS)
            .min(count);
        let chunk = count.div_ceil(readers);
        debug!(entries = count, readers, "reading archive entries");

        let chunks = thread::scope(|scope| {
            let handles = (0..count)
                .step_by(chunk)
                .map(|start| {
                    let mut reader = self.archive.clone();
                    let range = start..(start + chunk).min(count);
                    scope.spawn(move || read_range(&mut reader, range))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(PackError::Archive("entry reader panicked".to_string()))
                    })
                })
                .collect::<Vec<_>>()
        });

        let mut entries = Vec::with_capacity(count);
        for chunk in chunks {
            entries.extend(chunk?);
        }
        Ok(entries)
    }
}

fn read_range<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    range: Range<usize>,
) -> Result<Vec<ArchiveEntry>, PackError> {
    let mut entries = Vec::with_capacity(range.len());
    for index in range {
        let mut file = archive.by_index(index).map_err(archive_error)?;
        let path = file.name().to_string();
        if file.is_dir() {
            entries.push(ArchiveEntry::directory(path));
            continue;
        }
        let declared = usize::try_from(file.size()).unwrap_or(MAX_PREALLOC);
        let mut contents = Vec::with_capacity(declared.min(MAX_PREALLOC));
        file.read_to_end(&mut contents)
            .map_err(|err| PackError::Archive(format!("read {path}: {err}")))?;
        entries.push(ArchiveEntry::file(path, contents));
    }
    Ok(entries)
}

pub struct ArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    pub fn add_file(&mut self, path: &str, contents: &[u8]) -> Result<(), PackError> {
        self.writer
            .start_file(path, self.options)
            .map_err(archive_error)?;
        self.writer
            .write_all(contents)
            .map_err(|err| PackError::Archive(format!("write {path}: {err}")))
    }

    pub fn add_directory(&mut self, path: &str) -> Result<(), PackError> {
        self.writer
            .add_directory(path, self.options)
            .map_err(archive_error)
    }

    pub fn add(&mut self, entry: &ArchiveEntry) -> Result<(), PackError> {
        if entry.is_directory {
            self.add_directory(&entry.path)
        } else {
            self.add_file(&entry.path, entry.bytes())
        }
    }

    pub fn finalize(self) -> Result<Vec<u8>, PackError> {
        let cursor = self.writer.finish().map_err(archive_error)?;
        Ok(cursor.into_inner())
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies `entries`, swapping the manifest contents for `manifest`.
///
/// Fails before copying anything when there is no manifest entry.
pub fn rewrite(entries: &[ArchiveEntry], manifest: &[u8]) -> Result<Vec<ArchiveEntry>, PackError> {
    ensure_manifest(entries)?;
    Ok(entries
        .iter()
        .map(|entry| {
            if is_manifest(entry) {
                ArchiveEntry::file(entry.path.clone(), manifest.to_vec())
            } else {
                entry.clone()
            }
        })
        .collect())
}

/// Builds a finished archive from `entries` with the manifest replaced.
pub fn transform_entries(entries: &[ArchiveEntry], manifest: &[u8]) -> Result<Vec<u8>, PackError> {
    ensure_manifest(entries)?;
    let mut builder = ArchiveBuilder::new();
    for entry in entries {
        if is_manifest(entry) {
            builder.add_file(&entry.path, manifest)?;
        } else {
            builder.add(entry)?;
        }
    }
    builder.finalize()
}

pub fn transform(source: &SourceArchive<'_>, manifest: &[u8]) -> Result<Vec<u8>, PackError> {
    if !source.contains(MANIFEST_PATH) {
        return Err(PackError::ManifestEntryNotFound(MANIFEST_PATH.to_string()));
    }
    let entries = source.read_entries()?;
    transform_entries(&entries, manifest)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub valid: bool,
    pub entries: usize,
    pub format_code: Option<FormatCode>,
    pub description: Option<String>,
    pub problem: Option<String>,
}

/// Checks whether `bytes` look like a resource pack and reads its current
/// format code when the manifest decodes.
pub fn scan(bytes: &[u8]) -> Result<ScanReport, PackError> {
    let source = SourceArchive::open(bytes)?;
    if !source.contains(MANIFEST_PATH) {
        return Ok(ScanReport {
            valid: false,
            entries: source.len(),
            format_code: None,
            description: None,
            problem: Some(format!("{MANIFEST_PATH} not found")),
        });
    }
    let report = match manifest::decode(&source.read_file(MANIFEST_PATH)?) {
        Ok(payload) => ScanReport {
            valid: true,
            entries: source.len(),
            format_code: Some(payload.format_code()),
            description: payload.description().map(str::to_string),
            problem: None,
        },
        Err(err) => ScanReport {
            valid: false,
            entries: source.len(),
            format_code: None,
            description: None,
            problem: Some(err.to_string()),
        },
    };
    Ok(report)
}

fn ensure_manifest(entries: &[ArchiveEntry]) -> Result<(), PackError> {
    if entries.iter().any(is_manifest) {
        Ok(())
    } else {
        Err(PackError::ManifestEntryNotFound(MANIFEST_PATH.to_string()))
    }
}

fn is_manifest(entry: &ArchiveEntry) -> bool {
    !entry.is_directory && entry.path == MANIFEST_PATH
}

fn archive_error(err: zip::result::ZipError) -> PackError {
    PackError::Archive(err.to_string())
}
