//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the link crates MUST NOT call sleep methods.
//! Waiting happens on I/O, channels, or timeouts.
//! **Exceptions**: retry backoff, simulated handshake latency in the
//! in-memory transport, test code.

use std::path::Path;

use architectural_enforcement::{code_part, production_lines, rust_files};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  {violation}");
        }

        eprintln!("\nACCEPTABLE sleep uses:");
        eprintln!("  - Backoff between retry attempts (retry engine)");
        eprintln!("  - Scripted handshake delay in the in-memory transport");
        eprintln!("  - Test code");
        eprintln!("\nFORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for a connection (use the session events)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for dir in ["link/core/src", "link/cli/src"] {
        for path in rust_files(dir) {
            check_file(&path, &mut violations);
        }
    }

    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let lines = production_lines(path);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);

        if code.contains("std::thread::sleep") || code.contains("thread::sleep(") {
            violations.push(format!(
                "{}:{} - blocking thread sleep: {}",
                path.display(),
                idx + 1,
                line.trim()
            ));
            continue;
        }

        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }

        if is_backoff_context(&lines, idx) {
            continue;
        }

        if path.ends_with("transport/in_memory.rs") && is_scripted_delay(line) {
            continue;
        }

        violations.push(format!("{}:{} - {}", path.display(), idx + 1, line.trim()));
    }
}

/// Check if sleep waits out a retry backoff
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for line in &lines[context_range] {
        let line = line.to_lowercase();

        if line.contains("backoff") || line.contains("delay_for") {
            has_backoff_calc = true;
        }

        if line.contains("retry") || line.contains("retries") || line.contains("attempt") {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Check if sleep is the scripted handshake delay
fn is_scripted_delay(line: &str) -> bool {
    line.contains("Handshake::Delay")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_detection() {
        let test_code = vec![
            "if attempt >= max_attempts {",
            "    return Err(RetryError::Exhausted { attempts: attempt, source: error });",
            "}",
            "let delay = policy.backoff.delay_for(attempt - 1);",
            "tokio::time::sleep(delay).await;",
        ];

        assert!(
            is_backoff_context(&test_code, 4),
            "Should detect retry backoff"
        );
    }

    #[test]
    fn test_polling_sleep_not_backoff() {
        let test_code = vec![
            "loop {",
            "    if session.is_connected() { break; }",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ];

        assert!(
            !is_backoff_context(&test_code, 2),
            "Polling loop must not count as backoff"
        );
    }

    #[test]
    fn test_scripted_delay_detection() {
        assert!(is_scripted_delay(
            "Handshake::Delay(delay) => tokio::time::sleep(delay).await,"
        ));
        assert!(!is_scripted_delay("tokio::time::sleep(delay).await;"));
    }
}
