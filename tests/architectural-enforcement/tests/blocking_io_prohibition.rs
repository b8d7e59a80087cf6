//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in production code MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net` and the async `reqwest` client.
//! Synchronous helpers (config loading, sprite sheet loading before the
//! event loop starts) may use `std::fs`.

use architectural_enforcement::{production_sources, report};

const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.source_lines().enumerate() {
            for (pattern, what) in BLOCKING_PATTERNS {
                if line.code.contains(pattern) && file.in_async_fn(idx) {
                    violations.push(format!("{what}: {line}"));
                }
            }
        }
    }

    report(
        "CRITICAL: Blocking I/O calls found in async code!",
        &[
            "✅ REQUIRED: tokio::fs::write().await, tokio::net::TcpStream, reqwest::Client",
            "✅ ACCEPTABLE: std::fs in synchronous helpers called before the event loop",
        ],
        &violations,
    );
}

#[test]
fn test_no_blocking_http_client_anywhere() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(|file| file.source_lines())
        .filter(|line| line.code.contains("reqwest::blocking"))
        .map(|line| line.to_string())
        .collect();

    report(
        "CRITICAL: reqwest::blocking used in production code!",
        &["The REST source is async; use reqwest::Client."],
        &violations,
    );
}
