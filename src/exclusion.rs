//! Exclusion rules - decides which paths are never watched or baselined
//!
//! Evaluation order, first match wins:
//! 1. Built-in editor/transient file patterns (`~`, swap files, `.tmp`, `.bak`, ...)
//! 2. Folder rules, matched as whole path components
//! 3. File rules, matched as folder components when folder-like, else as path suffixes
//!
//! All comparisons are case-insensitive and `\` is treated as `/`.

use std::path::Path;

const TRANSIENT_SUFFIXES: [&str; 4] = [".tmp", ".temp", ".bak", ".old"];

/// Per-system exclusion predicate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionMatcher {
    folder_rules: Vec<String>,
    file_rules: Vec<String>,
}

impl ExclusionMatcher {
    pub fn new(folder_rules: Vec<String>, file_rules: Vec<String>) -> Self {
        Self {
            folder_rules,
            file_rules,
        }
    }

    pub fn folder_rules(&self) -> &[String] {
        &self.folder_rules
    }

    pub fn file_rules(&self) -> &[String] {
        &self.file_rules
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        is_excluded(path, &self.folder_rules, &self.file_rules)
    }

    /// Evaluate `path` relative to `root`, so that components of the root
    /// itself never match a rule.
    pub fn is_excluded_under(&self, root: &Path, path: &Path) -> bool {
        match path.strip_prefix(root) {
            Ok(relative) if relative.as_os_str().is_empty() => false,
            Ok(relative) => self.is_excluded(relative),
            Err(_) => self.is_excluded(path),
        }
    }
}

/// Returns true when `path` must be ignored.
pub fn is_excluded<S: AsRef<str>>(path: &Path, folder_rules: &[S], file_rules: &[S]) -> bool {
    let normalized = normalize(&path.to_string_lossy());

    if is_builtin_excluded(&normalized) {
        return true;
    }

    if folder_rules
        .iter()
        .any(|rule| matches_component(&normalized, rule.as_ref()))
    {
        return true;
    }

    file_rules.iter().any(|rule| {
        let rule = rule.as_ref().trim();
        if rule.is_empty() {
            return false;
        }
        if is_folder_like(rule) {
            matches_component(&normalized, rule)
        } else {
            normalized.ends_with(&rule.replace('\\', "/").to_lowercase())
        }
    })
}

/// Lowercase, forward slashes, always rooted with a leading `/`.
fn normalize(raw: &str) -> String {
    let lowered = raw.replace('\\', "/").to_lowercase();
    if lowered.starts_with('/') {
        lowered
    } else {
        format!("/{}", lowered)
    }
}

fn is_builtin_excluded(normalized: &str) -> bool {
    let file_name = normalized.rsplit('/').next().unwrap_or(normalized);

    if file_name.ends_with('~') {
        return true;
    }

    if file_name.ends_with(".swp")
        || file_name.ends_with(".swo")
        || (file_name.starts_with('.') && file_name.contains(".sw"))
    {
        return true;
    }

    TRANSIENT_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
}

fn matches_component(normalized: &str, rule: &str) -> bool {
    let rule = rule.trim();
    if rule.is_empty() {
        return false;
    }
    let rule = rule.replace('\\', "/").to_lowercase();
    let rule = rule.trim_matches('/');
    if rule.is_empty() {
        return false;
    }

    normalized.contains(&format!("/{}/", rule)) || normalized.ends_with(&format!("/{}", rule))
}

/// Extensionless and dot-prefixed patterns are treated as folder names.
fn is_folder_like(rule: &str) -> bool {
    !rule.contains('.') || rule.starts_with('.')
}
