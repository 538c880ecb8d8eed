use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer tag stored in `pack.mcmeta` under `pack.pack_format`.
pub type FormatCode = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionEntry {
    pub label: String,
    pub format_code: FormatCode,
    pub is_snapshot: bool,
}

impl VersionEntry {
    pub fn release(label: impl Into<String>, format_code: FormatCode) -> Self {
        Self {
            label: label.into(),
            format_code,
            is_snapshot: false,
        }
    }

    pub fn snapshot(label: impl Into<String>, format_code: FormatCode) -> Self {
        Self {
            label: label.into(),
            format_code,
            is_snapshot: true,
        }
    }
}

/// What a conversion run should produce.
///
/// `Range` endpoints are labels from the active label list; they are looked up
/// by position when the run is validated, so their order does not matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionTarget {
    Single {
        format_code: FormatCode,
        label: Option<String>,
    },
    Range {
        from: String,
        to: String,
    },
}

impl ConversionTarget {
    pub fn format(format_code: FormatCode) -> Self {
        ConversionTarget::Single {
            format_code,
            label: None,
        }
    }

    pub fn labelled(format_code: FormatCode, label: impl Into<String>) -> Self {
        ConversionTarget::Single {
            format_code,
            label: Some(label.into()),
        }
    }

    pub fn range(from: impl Into<String>, to: impl Into<String>) -> Self {
        ConversionTarget::Range {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, ConversionTarget::Range { .. })
    }
}

impl fmt::Display for ConversionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionTarget::Single {
                format_code,
                label: Some(label),
            } => write!(f, "{label} (format {format_code})"),
            ConversionTarget::Single {
                format_code,
                label: None,
            } => write!(f, "format {format_code}"),
            ConversionTarget::Range { from, to } => write!(f, "{from}..{to}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub is_directory: bool,
    pub contents: Option<Vec<u8>>,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, contents: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            contents: Some(contents),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            contents: None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.contents.as_deref().unwrap_or_default()
    }
}
