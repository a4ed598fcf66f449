//! Process-wide monotonic request-id source.
//!
//! Per the source design notes, a single atomic counter shared across all
//! connections is sufficient: ids only need to be unique within a connection
//! and useful for cross-connection debugging, not globally unique in a
//! stronger sense. Centralized here so nothing constructs a request id any
//! other way.

use std::sync::atomic::{AtomicI32, Ordering};

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Returns the next request id and advances the counter. Wraps on overflow
/// (matches wire behavior: request ids are a 32-bit field with no reserved
/// values beyond 0, which we never hand out since the counter starts at 1).
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let a = next_request_id();
        let b = next_request_id();
        let c = next_request_id();
        assert!(a < b);
        assert!(b < c);
    }
}
