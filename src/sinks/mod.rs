use crate::pipeline::Record;

pub mod export;
pub mod postgrest;

pub use self::export::CsvExport;
pub use self::postgrest::PostgrestSink;

/// Result of submitting one batch to a [`TableSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Success { row_count: usize },
    Failure { detail: String },
}

/// Append-only remote table store.
///
/// Implementations report every problem, transport errors included, as
/// [`InsertOutcome::Failure`]; a rejected batch never aborts a run.
pub trait TableSink {
    fn insert(&mut self, table: &str, records: &[Record]) -> InsertOutcome;
}

impl<S: TableSink + ?Sized> TableSink for Box<S> {
    fn insert(&mut self, table: &str, records: &[Record]) -> InsertOutcome {
        (**self).insert(table, records)
    }
}
