use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PackError {
    #[error("pack.mcmeta is not valid JSON: {0}")]
    MalformedManifest(String),

    #[error("pack.mcmeta has no integer pack.pack_format field")]
    MissingFormatField,

    #[error("archive has no {0} entry")]
    #[diagnostic(help("resource packs keep pack.mcmeta at the root of the zip"))]
    ManifestEntryNotFound(String),

    #[error("invalid target selection: {0}")]
    InvalidTargetSelection(String),

    #[error("filename {filename} contains several versions ({}); cannot pick one to rewrite", .versions.join(", "))]
    #[diagnostic(help("rename the file or disable smart naming"))]
    AmbiguousFilenameVersion {
        filename: String,
        versions: Vec<String>,
    },

    #[error("version table unavailable: {0}")]
    VersionTableUnavailable(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}
