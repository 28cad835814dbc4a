//! Deterministic id generation for tests.

use conveyor_core::ids::IdGenerator;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates `msg-00000001`, `msg-00000002`, ... — predictable and still
/// lexicographically creation-ordered, like the production generator.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    /// Create a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("msg-{n:08}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_and_sorted() {
        let generator = SequentialIdGenerator::new();
        let first = generator.generate();
        let second = generator.generate();

        assert_eq!(first, "msg-00000001");
        assert_eq!(second, "msg-00000002");
        assert!(first < second);
    }
}
