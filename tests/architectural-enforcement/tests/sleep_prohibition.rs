//! Integration Test: Sleep Prohibition
//!
//! **Policy**: router production code MUST NOT sleep. Quota windows are
//! computed from the injected clock; waiting out a limit is the caller's
//! decision, driven by the `retry_after` hint on the refusal.
//! **Exceptions**: exponential backoff in retry logic, periodic tasks driven
//! by `tokio::time::interval`, test code.

use std::path::Path;

use architectural_enforcement::{code_part, is_test_code, production_files, Violation};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(|path| check_file(path))
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff in retry logic");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleeping until a rate-limit window reopens");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep in polling loops");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn check_file(path: &Path) -> Vec<Violation> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    check_lines(path, &lines)
}

fn check_lines(path: &Path, lines: &[&str]) -> Vec<Violation> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            let code = code_part(line);
            code.contains("::sleep(") || code.contains(".sleep(")
        })
        .filter(|(idx, _)| {
            !is_test_code(lines, *idx)
                && !is_backoff_context(lines, *idx)
                && !is_interval_pattern(lines, *idx)
        })
        .map(|(idx, line)| Violation {
            path: path.to_path_buf(),
            line: idx + 1,
            message: "Sleep call",
            code: line.trim().to_string(),
        })
        .collect()
}

/// Sleep next to an exponential delay calculation and retry wording
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(15);
    let end = (current_idx + 5).min(lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;
    for line in &lines[start..end] {
        let line = line.to_lowercase();
        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }
        if ["retry", "reconnect", "backoff", "attempt"]
            .iter()
            .any(|word| line.contains(word))
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Sleep inside a loop paced by `tokio::time::interval`
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(20);
    let end = (current_idx + 5).min(lines.len());

    lines[start..end]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_until_window_reset_is_flagged() {
        let code = [
            "pub async fn wait_for_quota(&self, err: &RateLimitError) {",
            "    tokio::time::sleep(err.retry_after).await;",
            "}",
        ];
        let found = check_lines(Path::new("governor.rs"), &code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
    }

    #[test]
    fn test_backoff_detection() {
        let code = [
            "async fn reload_with_retry() {",
            "    let delay = base_delay * (1 << attempt);",
            "    tracing::warn!(attempt, \"Catalog reload failed, retrying\");",
            "    tokio::time::sleep(Duration::from_millis(delay)).await;",
            "}",
        ];
        assert!(is_backoff_context(&code, 3));
        assert!(check_lines(Path::new("catalog.rs"), &code).is_empty());
    }

    #[test]
    fn test_sleep_in_tests_is_allowed() {
        let code = [
            "#[tokio::test]",
            "async fn test_window_reopens() {",
            "    tokio::time::sleep(Duration::from_millis(5)).await;",
            "}",
        ];
        assert!(check_lines(Path::new("tests.rs"), &code).is_empty());
    }
}
