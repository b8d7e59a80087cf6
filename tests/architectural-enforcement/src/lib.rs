//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the coverclock crates:
//! - No blocking sleeps; async sleeps only for reconnect delays and pacing
//! - No blocking I/O inside async functions
//! - No `unwrap()`/`expect()` in production code
//!
//! The helpers here collect the production part of every source file (the
//! part before its `mod tests` block). Test support files are skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Crate source directories that are checked
pub const PRODUCTION_DIRS: &[&str] = &["coverclock/core/src", "coverclock/daemon/src"];

/// Files that only exist for tests
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// One production source line
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line is in
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Full line text
    pub text: String,
    /// Text before any `//` comment
    pub code: String,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.text.trim())
    }
}

/// One production source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Lines before the test module
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Lines with their numbers and comment-stripped code
    pub fn source_lines(&self) -> impl Iterator<Item = SourceLine> + '_ {
        self.lines.iter().enumerate().map(|(idx, text)| SourceLine {
            path: self.path.clone(),
            number: idx + 1,
            text: text.clone(),
            code: text.split("//").next().unwrap_or(text).to_string(),
        })
    }

    /// Whether the function enclosing line `idx` is `async`
    pub fn in_async_fn(&self, idx: usize) -> bool {
        for line in self.lines[..=idx.min(self.lines.len().saturating_sub(1))]
            .iter()
            .rev()
        {
            let code = line.split("//").next().unwrap_or(line);
            if code.contains("fn ") {
                return code.contains("async fn ");
            }
        }
        false
    }

    /// Whether any of the `radius` lines around `idx` mentions one of `words`
    pub fn context_mentions(&self, idx: usize, radius: usize, words: &[&str]) -> bool {
        let start = idx.saturating_sub(radius);
        let end = (idx + radius + 1).min(self.lines.len());
        self.lines[start..end].iter().any(|line| {
            let line = line.to_lowercase();
            words.iter().any(|w| line.contains(w))
        })
    }
}

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// All production source files under [`PRODUCTION_DIRS`]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let file = entry.path();
            if file.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let name = file.file_name().and_then(|s| s.to_str()).unwrap_or_default();
            if TEST_ONLY_FILES.contains(&name) {
                continue;
            }
            let Ok(content) = fs::read_to_string(file) else {
                continue;
            };

            let lines = content
                .lines()
                .take_while(|line| !line.trim_start().starts_with("mod tests"))
                .map(str::to_string)
                .collect();
            let relative = file.strip_prefix(&root).unwrap_or(file).to_path_buf();
            files.push(SourceFile {
                path: relative,
                lines,
            });
        }
    }

    files
}

/// Print violations and fail the test if there are any
pub fn report(title: &str, hint: &[&str], violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in hint {
        eprintln!("  {line}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_are_found() {
        let files = production_sources();
        assert!(
            files.iter().any(|f| f.path.ends_with("orchestrator.rs")),
            "core sources not found from {}",
            workspace_root().display()
        );
        assert!(!files.iter().any(|f| f.path.ends_with("test_utils.rs")));
    }

    #[test]
    fn test_async_detection() {
        let file = SourceFile {
            path: PathBuf::from("x.rs"),
            lines: vec![
                "fn plain() {".into(),
                "    a();".into(),
                "}".into(),
                "pub async fn run(&self) {".into(),
                "    b().await;".into(),
            ],
        };
        assert!(!file.in_async_fn(1));
        assert!(file.in_async_fn(4));
    }
}
