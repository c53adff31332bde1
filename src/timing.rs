//! Named-interval profiler for the solver's timing breakdown.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// Accumulates wall-clock time per tag across repeated calls.
///
/// Interior-mutable so the solver can time closures that mutate its own
/// state while the profiler is borrowed alongside. When disabled, `time`
/// runs the closure without touching the clock.
pub struct Profiler {
    enabled: bool,
    intervals: RefCell<FxHashMap<&'static str, Duration>>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            intervals: RefCell::new(FxHashMap::default()),
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Runs `f`, adding its elapsed time to `tag`'s accumulated interval.
    pub fn time<R>(&self, tag: &'static str, f: impl FnOnce() -> R) -> R {
        if !self.enabled {
            return f();
        }
        let start = Instant::now();
        let out = f();
        let elapsed = start.elapsed();
        *self.intervals.borrow_mut().entry(tag).or_default() += elapsed;
        out
    }

    /// Total accumulated time under `tag`; zero for tags never timed.
    pub fn elapsed(&self, tag: &str) -> Duration {
        self.intervals
            .borrow()
            .get(tag)
            .copied()
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        self.intervals.borrow_mut().clear();
    }
}
