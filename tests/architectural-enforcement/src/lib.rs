//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the enforcement tests under `tests/`:
//! - No blocking I/O inside async router code
//! - No sleep() calls in production code
//!
//! The scanners are line based. They recognise function signatures, test
//! functions and `#[cfg(test)]` modules well enough for rustfmt-formatted
//! code; they do not parse Rust.

use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["router/core/src", "router/cli/src"];

/// Workspace root, derived from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file below `dir`, sorted for stable reports
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Every production `.rs` file in the workspace
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| rust_files(&root.join(dir)))
        .collect()
}

/// A line with any `//` comment removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether a function is async
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `fn`
    Sync,
    /// `async fn`
    Async,
}

/// Classify a line that opens a function signature
///
/// Visibility and qualifiers (`pub`, `pub(crate)`, `const`, `unsafe`) are
/// skipped, so `pub(crate) async fn run(` is recognised as async.
#[must_use]
pub fn fn_kind(line: &str) -> Option<FnKind> {
    let mut rest = line.trim_start();
    let mut is_async = false;

    loop {
        if let Some(after) = rest.strip_prefix("pub(") {
            rest = after.split_once(')').map_or("", |(_, r)| r).trim_start();
        } else if let Some(after) = rest.strip_prefix("pub ") {
            rest = after.trim_start();
        } else if let Some(after) = rest.strip_prefix("async ") {
            is_async = true;
            rest = after.trim_start();
        } else if let Some(after) = rest
            .strip_prefix("const ")
            .or_else(|| rest.strip_prefix("unsafe "))
        {
            rest = after.trim_start();
        } else {
            break;
        }
    }

    rest.starts_with("fn ").then_some(if is_async {
        FnKind::Async
    } else {
        FnKind::Sync
    })
}

/// The nearest function signature at or above `idx`
///
/// Stops at `impl`, `mod` and `trait` blocks; code there is outside any
/// function.
#[must_use]
pub fn enclosing_fn(lines: &[&str], idx: usize) -> Option<(usize, FnKind)> {
    for i in (0..=idx.min(lines.len().saturating_sub(1))).rev() {
        let line = lines[i].trim();
        if let Some(kind) = fn_kind(line) {
            return Some((i, kind));
        }
        if is_block_boundary(line) {
            return None;
        }
    }
    None
}

fn is_block_boundary(line: &str) -> bool {
    let line = line.strip_prefix("pub ").unwrap_or(line);
    ["impl ", "impl<", "mod ", "trait "]
        .iter()
        .any(|prefix| line.starts_with(prefix))
        && line.contains('{')
}

/// Whether `idx` is test code: below a `#[cfg(test)]` module, or inside a
/// function marked `#[test]` / `#[tokio::test]`
#[must_use]
pub fn is_test_code(lines: &[&str], idx: usize) -> bool {
    let in_test_module = lines[..idx].windows(2).any(|pair| {
        pair[0].trim() == "#[cfg(test)]" && pair[1].trim_start().starts_with("mod ")
    });
    if in_test_module {
        return true;
    }

    let Some((fn_idx, _)) = enclosing_fn(lines, idx) else {
        return false;
    };
    lines[..fn_idx]
        .iter()
        .rev()
        .map(|l| l.trim())
        .take_while(|l| l.starts_with("#[") || l.starts_with("///"))
        .any(|l| l.starts_with("#[test]") || l.starts_with("#[tokio::test"))
}

/// One finding, rendered as `path:line - message: code`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File the finding is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub message: &'static str,
    /// The offending line, trimmed
    pub code: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.message,
            self.code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_kind_detection() {
        assert_eq!(fn_kind("fn main() {"), Some(FnKind::Sync));
        assert_eq!(fn_kind("    pub fn load(path: &Path) -> Config {"), Some(FnKind::Sync));
        assert_eq!(fn_kind("pub(crate) async fn run("), Some(FnKind::Async));
        assert_eq!(fn_kind("pub async fn select_model("), Some(FnKind::Async));
        assert_eq!(fn_kind("let f = |x| x + 1;"), None);
        assert_eq!(fn_kind("// fn commented()"), None);
    }

    #[test]
    fn test_enclosing_fn_stops_at_impl() {
        let code = [
            "async fn earlier() {}",
            "impl Store {",
            "    const LIMIT: u32 = 3;",
        ];
        assert_eq!(enclosing_fn(&code, 0), Some((0, FnKind::Async)));
        assert_eq!(enclosing_fn(&code, 2), None);
    }

    #[test]
    fn test_test_code_detection() {
        let code = [
            "pub fn load() {",
            "    read();",
            "}",
            "#[tokio::test]",
            "async fn test_load() {",
            "    read();",
            "}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn helper() {}",
        ];
        assert!(!is_test_code(&code, 1));
        assert!(is_test_code(&code, 5));
        assert!(is_test_code(&code, 9));
    }
}
