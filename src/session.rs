use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::pipeline::Pipeline;
use crate::versions::{DocumentSource, Resolution, Resolver, VersionTable};

/// Load state of the version table. Pending and failed are kept apart so a
/// caller can tell "not yet" from "could not".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TableState {
    Pending,
    Ready {
        #[serde(skip)]
        table: Arc<VersionTable>,
        fetched_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

/// The file currently selected for conversion.
#[derive(Debug, Clone)]
pub struct Selection {
    pub name: String,
    pub bytes: Arc<[u8]>,
    pub generation: u64,
}

/// Session-wide state: the resolved table and the selected file. The owner
/// swaps either one wholesale; nothing here is mutated behind a run's back.
#[derive(Debug)]
pub struct Session {
    table: TableState,
    selection: Option<Selection>,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            table: TableState::Pending,
            selection: None,
            generation: 0,
        }
    }

    pub fn table_state(&self) -> &TableState {
        &self.table
    }

    /// The current table, or an empty one while pending or after a failure.
    pub fn table(&self) -> Arc<VersionTable> {
        match &self.table {
            TableState::Ready { table, .. } => Arc::clone(table),
            TableState::Pending | TableState::Failed { .. } => Arc::new(VersionTable::empty()),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.table())
    }

    pub fn begin_refresh(&mut self) {
        self.table = TableState::Pending;
    }

    pub fn complete_refresh(&mut self, resolution: Resolution) {
        self.table = match resolution.error {
            Some(err) => TableState::Failed {
                error: err.to_string(),
            },
            None => TableState::Ready {
                table: Arc::new(resolution.table),
                fetched_at: Utc::now(),
            },
        };
    }

    /// Fetches the table again and replaces the current one.
    pub fn refresh<S: DocumentSource>(&mut self, resolver: &Resolver<S>, uri: &str) -> &TableState {
        self.begin_refresh();
        let resolution = resolver.resolve(uri);
        self.complete_refresh(resolution);
        &self.table
    }

    /// Selects a new file. Any run started for an earlier selection becomes
    /// stale.
    pub fn select_file(&mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> &Selection {
        self.generation += 1;
        debug!(generation = self.generation, "file selected");
        self.selection.insert(Selection {
            name: name.into(),
            bytes: bytes.into(),
            generation: self.generation,
        })
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Returns `output` only if it was produced for the current selection.
    pub fn accept<T>(&self, generation: u64, output: T) -> Option<T> {
        if generation == self.generation && self.selection.is_some() {
            Some(output)
        } else {
            debug!(
                generation,
                current = self.generation,
                "dropping result for stale selection"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::VersionEntry;
    use crate::error::PackError;

    struct FixedSource(Result<&'static str, &'static str>);

    impl DocumentSource for FixedSource {
        fn fetch_document(&self, _uri: &str) -> Result<String, PackError> {
            self.0
                .map(str::to_string)
                .map_err(|message| PackError::Http(message.to_string()))
        }
    }

    #[test]
    fn starts_pending_with_empty_table() {
        let session = Session::new();
        assert_matches!(session.table_state(), TableState::Pending);
        assert!(session.table().is_empty());
    }

    #[test]
    fn refresh_failure_degrades_to_empty_table() {
        let mut session = Session::new();
        let resolver = Resolver::new(FixedSource(Err("offline")));
        assert_matches!(
            session.refresh(&resolver, "https://example.invalid"),
            TableState::Failed { .. }
        );
        assert!(session.table().is_empty());
    }

    #[test]
    fn refresh_replaces_table() {
        let mut session = Session::new();
        let resolver = Resolver::new(FixedSource(Ok(
            "<table><tr><td>15</td><td></td><td>1.20</td></tr></table>",
        )));
        session.refresh(&resolver, "uri");
        let first = session.table();
        assert_eq!(first.format_code_of("1.20"), Some(15));

        session.complete_refresh(Resolution {
            table: VersionTable::from_entries([VersionEntry::release("1.21", 34)]),
            error: None,
        });
        assert_eq!(first.format_code_of("1.20"), Some(15));
        assert_eq!(session.table().format_code_of("1.21"), Some(34));
    }

    #[test]
    fn newer_selection_invalidates_older_runs() {
        let mut session = Session::new();
        let first = session.select_file("a.zip", vec![1u8]).generation;
        assert_eq!(session.accept(first, "a"), Some("a"));

        let second = session.select_file("b.zip", vec![2u8]).generation;
        assert_eq!(session.accept(first, "a"), None);
        assert_eq!(session.accept(second, "b"), Some("b"));
    }
}
