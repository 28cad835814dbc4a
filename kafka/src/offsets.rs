//! Safe-to-commit offset tracking.
//!
//! Handlers complete out of order across swimlanes, and within a partition
//! a completion may arrive while an earlier record is still in flight. The
//! tracker records which offsets were fetched (`note_unprocessed`) and
//! which have completed successfully (`note_processed`), and computes per
//! partition the highest offset that is safe to commit: the largest
//! completed offset below the lowest offset still in flight. A failed or
//! abandoned record never becomes processed, so the watermark — and the
//! committed offset — stalls at it and the broker redelivers from there.

use std::collections::{BTreeMap, BTreeSet};

/// Identifies one partition of one topic.
pub type TopicPartition = (String, i32);

#[derive(Debug, Default)]
struct PartitionOffsets {
    unprocessed: BTreeSet<i64>,
    processed: BTreeSet<i64>,
}

/// Per-partition bookkeeping of in-flight and completed offsets.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: BTreeMap<TopicPartition, PartitionOffsets>,
}

impl OffsetTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a fetched record is now in flight.
    pub fn note_unprocessed(&mut self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .unprocessed
            .insert(offset);
    }

    /// Record that a record's handler completed successfully.
    pub fn note_processed(&mut self, topic: &str, partition: i32, offset: i64) {
        if let Some(entry) = self.partitions.get_mut(&(topic.to_string(), partition)) {
            if entry.unprocessed.remove(&offset) {
                entry.processed.insert(offset);
            }
        }
    }

    /// Forget an in-flight record that was dropped without running (e.g. a
    /// dispatch rejected by a stopping swimlane), so it does not stall the
    /// watermark of records that did complete before it.
    pub fn note_abandoned(&mut self, topic: &str, partition: i32, offset: i64) {
        if let Some(entry) = self.partitions.get_mut(&(topic.to_string(), partition)) {
            entry.unprocessed.remove(&offset);
        }
    }

    /// Compute and drain the offsets that are newly safe to commit.
    ///
    /// For each partition this returns the largest processed offset below
    /// the smallest in-flight offset, consuming the processed entries it
    /// covers; a second call returns nothing until more records complete.
    /// The returned value is the record offset — the broker commit position
    /// is this plus one.
    pub fn offsets_to_commit(&mut self) -> BTreeMap<TopicPartition, i64> {
        let mut safe = BTreeMap::new();

        for (key, entry) in &mut self.partitions {
            let in_flight_floor = entry.unprocessed.first().copied().unwrap_or(i64::MAX);

            let mut watermark = None;
            while let Some(&lowest) = entry.processed.first() {
                if lowest >= in_flight_floor {
                    break;
                }
                entry.processed.remove(&lowest);
                watermark = Some(lowest);
            }

            if let Some(offset) = watermark {
                safe.insert(key.clone(), offset);
            }
        }

        safe
    }

    /// Whether any record of any partition is still in flight.
    #[must_use]
    pub fn has_in_flight(&self) -> bool {
        self.partitions
            .values()
            .any(|entry| !entry.unprocessed.is_empty())
    }
}
