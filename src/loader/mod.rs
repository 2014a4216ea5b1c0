//! Batch-at-a-time insertion of a dataset's records.
//!
//! Batches are independent: a rejected batch is logged and recorded, earlier
//! batches stay written, later batches are still attempted. There is no
//! retry and no rollback.

use std::num::NonZeroUsize;
use std::ops::Range;
use std::time::Duration;

use crate::pipeline::Record;
use crate::sinks::{InsertOutcome, TableSink};

#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub table: String,
    pub chunk_size: NonZeroUsize,
    pub pause: Duration,
}

/// Outcome of one batch together with the slice of records it covered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    pub index: usize,
    pub range: Range<usize>,
    pub outcome: InsertOutcome,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_inserted: usize,
    pub rows_failed: usize,
}

impl LoadSummary {
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        let mut summary = LoadSummary::default();
        for batch in outcomes {
            summary.attempted += 1;
            match &batch.outcome {
                InsertOutcome::Success { row_count } => {
                    summary.succeeded += 1;
                    summary.rows_inserted += row_count;
                }
                InsertOutcome::Failure { .. } => {
                    summary.failed += 1;
                    summary.rows_failed += batch.range.len();
                }
            }
        }
        summary
    }

    pub fn merge(&mut self, other: &LoadSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.rows_inserted += other.rows_inserted;
        self.rows_failed += other.rows_failed;
    }
}

/// Splits `len` records into consecutive ranges of `chunk_size`; only the
/// last range may be shorter.
pub fn batch_ranges(len: usize, chunk_size: NonZeroUsize) -> impl Iterator<Item = Range<usize>> {
    let size = chunk_size.get();
    (0..len)
        .step_by(size)
        .map(move |start| start..(start + size).min(len))
}

/// Inserts `records` batch by batch and returns one outcome per batch, in
/// batch order. `context` identifies the dataset in log lines.
pub fn load<S: TableSink + ?Sized>(
    records: &[Record],
    options: &LoadOptions,
    sink: &mut S,
    context: &str,
) -> Vec<BatchOutcome> {
    let mut outcomes = Vec::new();

    for (index, range) in batch_ranges(records.len(), options.chunk_size).enumerate() {
        if index > 0 && !options.pause.is_zero() {
            std::thread::sleep(options.pause);
        }

        let outcome = sink.insert(&options.table, &records[range.clone()]);
        let batch = BatchOutcome {
            index,
            range,
            outcome,
        };
        report(&batch, context);
        outcomes.push(batch);
    }

    outcomes
}

fn report(batch: &BatchOutcome, context: &str) {
    let first = batch.range.start;
    let last = batch.range.end.saturating_sub(1);

    match &batch.outcome {
        InsertOutcome::Success { row_count } => {
            tracing::info!(
                "Inserted chunk {} ({}-{}, {} rows) for {}",
                batch.index,
                first,
                last,
                row_count,
                context
            );
            if *row_count != batch.range.len() {
                tracing::warn!(
                    "Store confirmed {} of {} rows in chunk {} ({}-{}) for {}",
                    row_count,
                    batch.range.len(),
                    batch.index,
                    first,
                    last,
                    context
                );
            }
        }
        InsertOutcome::Failure { detail } => {
            tracing::error!(
                "Error in chunk {} ({}-{}) for {}: {}",
                batch.index,
                first,
                last,
                context,
                detail
            );
        }
    }
}
