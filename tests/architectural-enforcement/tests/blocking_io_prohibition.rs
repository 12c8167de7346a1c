//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async router code MUST NOT use blocking I/O. Counter and
//! bandit state are written from inside request handling, so a blocking
//! write stalls every task on that worker thread.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::process`.
//!
//! Blocking calls are acceptable in non-async functions (configuration is
//! loaded before any request is served) and in test code.

use std::path::Path;

use architectural_enforcement::{
    code_part, enclosing_fn, is_test_code, production_files, FnKind, Violation,
};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(|path| check_file(path))
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async router code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O in async fns:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command::output()");
        eprintln!("  - std::io::stdin() / std::io::stdout() handles");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::process::Command::output().await");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (configuration loading)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_production_dirs_are_scanned() {
    let files = production_files();
    assert!(
        files.iter().any(|p| p.ends_with("router/core/src/lib.rs")),
        "router core sources not found; scanned: {files:?}"
    );
    assert!(files.iter().any(|p| p.ends_with("router/cli/src/main.rs")));
}

fn check_file(path: &Path) -> Vec<Violation> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    check_lines(path, &lines)
}

fn check_lines(path: &Path, lines: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        let Some(message) = blocking_call(code) else {
            continue;
        };

        if is_test_code(lines, idx) {
            continue;
        }

        // `use` lines and other module-level items count against the file.
        let in_sync_fn = matches!(enclosing_fn(lines, idx), Some((_, FnKind::Sync)));
        if in_sync_fn && !code.trim_start().starts_with("use ") {
            continue;
        }

        violations.push(Violation {
            path: path.to_path_buf(),
            line: idx + 1,
            message,
            code: line.trim().to_string(),
        });
    }

    violations
}

fn blocking_call(code: &str) -> Option<&'static str> {
    if code.contains("std::fs::") || code.contains("use std::fs") {
        Some("Blocking file I/O")
    } else if code.contains("std::net::") || code.contains("use std::net") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("reqwest::blocking") {
        Some("Blocking HTTP client")
    } else if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
        Some("Blocking stdin/stdout")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_io_in_async_fn_is_flagged() {
        let code = [
            "pub async fn persist(&self) {",
            "    let body = std::fs::read_to_string(&self.path);",
            "}",
        ];
        let found = check_lines(Path::new("store.rs"), &code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].message, "Blocking file I/O");
    }

    #[test]
    fn test_sync_config_loading_is_allowed() {
        let code = [
            "pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RouterConfig, ConfigError> {",
            "    let raw = std::fs::read_to_string(config_path)?;",
            "}",
        ];
        assert!(check_lines(Path::new("config.rs"), &code).is_empty());
    }

    #[test]
    fn test_commented_and_test_code_is_ignored() {
        let code = [
            "async fn run() {",
            "    // std::fs::write is not allowed here",
            "}",
            "#[cfg(test)]",
            "mod tests {",
            "    #[tokio::test]",
            "    async fn test_writes() {",
            "        std::fs::write(\"x\", \"y\").unwrap();",
            "    }",
            "}",
        ];
        assert!(check_lines(Path::new("lib.rs"), &code).is_empty());
    }

    #[test]
    fn test_module_level_import_is_flagged() {
        let code = ["use std::fs;", "", "fn helper() {}"];
        assert_eq!(check_lines(Path::new("lib.rs"), &code).len(), 1);
    }
}
