//! Process-wide identifiers

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Next identifier from the shared counter
///
/// Sessions, Pushers and Players all draw from this one sequence, so an ID
/// names exactly one object for the life of the process.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
        assert_ne!(a, 0);
    }
}
