use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Issues stream ids derived from the wall clock in milliseconds.
///
/// Ids are strictly increasing for the lifetime of the generator: two calls
/// within the same millisecond, or a clock that steps backwards, bump the
/// previous value by one instead of repeating it.
#[derive(Debug, Default)]
pub struct StreamIdGenerator {
    last: AtomicI64,
}

impl StreamIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        self.next_with_clock(Utc::now().timestamp_millis()).to_string()
    }

    fn next_with_clock(&self, now_ms: i64) -> i64 {
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}
