//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async connection code MUST NOT use blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net` and async reqwest, not
//! `std::fs`, `std::net` or `reqwest::blocking`.
//!
//! Profile persistence and config loading run synchronously by contract and
//! are not scanned.

use std::path::Path;

use architectural_enforcement::{code_part, production_lines, rust_files};

/// Directories holding async connection code
const ASYNC_DIRS: [&str; 2] = ["link/core/src/transport", "link/cli/src"];

/// Async files outside those directories
const ASYNC_FILES: [&str; 3] = [
    "link/core/src/context.rs",
    "link/core/src/recovery.rs",
    "link/core/src/health.rs",
];

/// Test that async code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O calls found in async code!\n");

        for violation in &violations {
            eprintln!("  {violation}");
        }

        eprintln!("\nFORBIDDEN blocking I/O:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("  - std::io::stdin() inside async functions");
        eprintln!("\nREQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await");
        eprintln!("  - tokio::net::TcpStream / tokio-tungstenite");
        eprintln!("  - tokio::io::stdin() with AsyncBufReadExt");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls in async code
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for dir in ASYNC_DIRS {
        for path in rust_files(dir) {
            check_file(&path, &mut violations);
        }
    }

    let root = architectural_enforcement::workspace_root();
    for file in ASYNC_FILES {
        let path = root.join(file);
        if path.exists() {
            check_file(&path, &mut violations);
        }
    }

    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let lines = production_lines(path);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(kind) = blocking_kind(code_part(line), &lines, idx) {
            violations.push(format!(
                "{}:{} - {kind}: {}",
                path.display(),
                idx + 1,
                line.trim()
            ));
        }
    }
}

/// Classify a blocking call on this line, if any
fn blocking_kind(code: &str, lines: &[&str], idx: usize) -> Option<&'static str> {
    if code.contains("std::fs::") || code.contains("use std::fs") {
        return Some("Blocking file I/O");
    }
    if code.contains("std::net::") || code.contains("use std::net") {
        return Some("Blocking network I/O");
    }
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }
    if code.contains("std::io::stdin()") && is_in_async_function(lines, idx) {
        return Some("Blocking stdin in async");
    }
    None
}

/// Check if line is inside an async function
fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.contains("async fn ") {
            return true;
        }

        if (line.starts_with("fn ") || line.starts_with("pub fn ")) && !line.contains("async") {
            return false;
        }

        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_io_detection() {
        let test_code = vec![
            "async fn connect() {",
            "    let stream = std::net::TcpStream::connect(addr)?;",
            "}",
        ];

        assert_eq!(
            blocking_kind(test_code[1], &test_code, 1),
            Some("Blocking network I/O")
        );
    }

    #[test]
    fn test_async_stdin_detection() {
        let test_code = vec![
            "pub async fn run(ctx: &LinkContext) -> Result<()> {",
            "    let line = std::io::stdin().read_line(&mut buf);",
            "}",
        ];

        assert!(is_in_async_function(&test_code, 1));
        assert!(blocking_kind(test_code[1], &test_code, 1).is_some());
    }

    #[test]
    fn test_sync_stdin_allowed() {
        let test_code = vec![
            "fn prompt() -> String {",
            "    std::io::stdin().read_line(&mut buf);",
            "}",
        ];

        assert!(blocking_kind(test_code[1], &test_code, 1).is_none());
    }
}
