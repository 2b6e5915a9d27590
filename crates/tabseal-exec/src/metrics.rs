//! Step timing counters and tracing hooks.
//!
//! Nothing here pulls a telemetry stack; subscribers decide where spans go.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Wall-clock milliseconds spent in each phase of `close_step`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTimings {
    pub hash_ms: u64,
    pub diff_ms: u64,
    pub write_wait_ms: u64,
}

/// Run `f` and add its elapsed milliseconds to `slot`.
pub fn timed<T>(slot: &mut u64, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    *slot += start.elapsed().as_millis() as u64;
    out
}

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::TRACE, "tabseal", event);
    let _enter = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}

pub fn emit_timings(ordinal: u64, name: &str, t: &StepTimings) {
    emit_span(
        "step_timings",
        &[
            ("ordinal", ordinal.to_string()),
            ("step", name.to_string()),
            ("hash_ms", t.hash_ms.to_string()),
            ("diff_ms", t.diff_ms.to_string()),
            ("write_wait_ms", t.write_wait_ms.to_string()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_accumulates() {
        let mut slot = 5;
        let v = timed(&mut slot, || 7);
        assert_eq!(v, 7);
        assert!(slot >= 5);
    }
}
