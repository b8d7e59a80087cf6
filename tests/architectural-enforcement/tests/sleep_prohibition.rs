//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT block a thread with `std::thread::sleep`.
//! Async sleeps are allowed only where a configured delay paces the work:
//! the reconnect delay, the clock interval and the sink's inter-stage delay.
//! Everything else waits on I/O, channels or `tokio::time::interval`.

use architectural_enforcement::{production_sources, report};

/// Words that mark a sleep as deliberate pacing
const PACING_WORDS: &[&str] = &["reconnect", "interval", "delay"];

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(|file| file.source_lines())
        .filter(|line| line.code.contains("thread::sleep"))
        .map(|line| line.to_string())
        .collect();

    report(
        "CRITICAL: std::thread::sleep found in production code!",
        &["Blocking the runtime thread stalls every task on the current_thread runtime."],
        &violations,
    );
}

#[test]
fn test_async_sleep_only_for_pacing() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.source_lines().enumerate() {
            if !(line.code.contains("::sleep(") || line.code.contains(".sleep(")) {
                continue;
            }
            if line.code.contains("thread::sleep") {
                continue; // covered above
            }
            if file.context_mentions(idx, 3, PACING_WORDS) {
                continue;
            }
            violations.push(line.to_string());
        }
    }

    report(
        "CRITICAL: sleep used outside of reconnect/pacing code!",
        &[
            "✅ ACCEPTABLE: reconnect delay, clock interval, sink send delay",
            "❌ FORBIDDEN: sleep in polling loops or as synchronization",
            "   Use tokio::time::interval, channels or watch instead.",
        ],
        &violations,
    );
}
