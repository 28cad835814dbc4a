//! Message id generation.
//!
//! Outbox rows are keyed by ids that sort lexicographically in creation
//! order, so the CDC relay can drain them in commit order without a separate
//! sequence column. The production generator renders a UUID v7 (16-byte,
//! millisecond-timestamp-prefixed) in simple form, with a shared counter
//! context so ids minted within the same millisecond still sort in creation
//! order. Tests substitute a deterministic generator through the
//! [`IdGenerator`] trait.

use uuid::timestamp::Timestamp;
use uuid::timestamp::context::ContextV7;
use uuid::Uuid;

/// Source of unique, creation-ordered message ids.
///
/// Implementations must be safe to share across producer tasks.
pub trait IdGenerator: Send + Sync {
    /// Produce the next id.
    fn generate(&self) -> String;
}

/// UUID v7 based generator: time-ordered, globally unique, rendered as a
/// 32-character lowercase hex string whose lexicographic order follows
/// creation order — including within a single millisecond, via the shared
/// monotonic counter context.
#[derive(Debug)]
pub struct TimeOrderedIdGenerator {
    context: std::sync::Mutex<ContextV7>,
}

impl TimeOrderedIdGenerator {
    /// Create a generator with its own counter context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: std::sync::Mutex::new(ContextV7::new()),
        }
    }
}

impl Default for TimeOrderedIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for TimeOrderedIdGenerator {
    fn generate(&self) -> String {
        #[allow(clippy::unwrap_used)]
        let context = self.context.lock().unwrap();
        Uuid::new_v7(Timestamp::now(&*context))
            .simple()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let generator = TimeOrderedIdGenerator::new();
        let ids: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ids_are_fixed_width_hex() {
        let id = TimeOrderedIdGenerator::new().generate();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let generator = TimeOrderedIdGenerator::new();
        let ids: Vec<String> = (0..100).map(|_| generator.generate()).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted, "ids must sort in the order they were minted");
    }
}
