//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors. `unwrap()` and `expect()`
//! are only allowed in tests.

use architectural_enforcement::{production_sources, report};

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(|file| file.source_lines())
        .filter(|line| line.code.contains(".unwrap()") || line.code.contains(".expect("))
        .map(|line| line.to_string())
        .collect();

    report(
        "CRITICAL: unwrap()/expect() found in production code!",
        &[
            "Return a Result and let the caller decide, or use",
            "unwrap_or / unwrap_or_default / unwrap_or_else where a fallback is correct.",
        ],
        &violations,
    );
}
