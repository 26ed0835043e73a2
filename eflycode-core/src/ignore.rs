//! `.eflycodeignore` / `.gitignore` pattern matching for directory-traversal tools.
//!
//! A plain struct holding a `Vec` of compiled patterns, evaluated in
//! insertion order so a later rule (including a negated one) overrides an
//! earlier match — no new dependency beyond `glob`.

use std::path::Path;

use glob::Pattern;

/// One ignore rule: a compiled glob plus whether it negates (`!pattern`)
/// a prior match.
struct Rule {
    pattern: Pattern,
    negate: bool,
    /// `true` if the original line ended in `/` — only matches directories.
    dir_only: bool,
}

/// A set of ignore rules loaded from one or more ignore files, applied in
/// file order (later rules, including negations, override earlier ones —
/// the same precedence `.gitignore` uses).
#[derive(Default)]
pub struct IgnoreSet {
    rules: Vec<Rule>,
}

impl IgnoreSet {
    /// An empty ignore set that matches nothing.
    #[must_use]
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Parse ignore lines (as found in `.gitignore`/`.eflycodeignore`) and
    /// append their rules. Blank lines and `#`-comments are skipped.
    pub fn add_patterns(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (negate, rest) = line
                .strip_prefix('!')
                .map_or((false, line), |rest| (true, rest));
            let dir_only = rest.ends_with('/');
            let rest = rest.strip_suffix('/').unwrap_or(rest);
            let glob_str = if rest.contains('/') {
                rest.trim_start_matches('/').to_string()
            } else {
                format!("**/{rest}")
            };
            if let Ok(pattern) = Pattern::new(&glob_str) {
                self.rules.push(Rule {
                    pattern,
                    negate,
                    dir_only,
                });
            }
        }
    }

    /// Load and merge an ignore file's contents, if it exists. Missing files
    /// are silently treated as contributing no rules.
    pub fn add_file(&mut self, path: &Path) {
        if let Ok(contents) = std::fs::read_to_string(path) {
            self.add_patterns(&contents);
        }
    }

    /// `true` if `relative_path` (forward-slash separated, relative to the
    /// workspace root) should be excluded from traversal.
    #[must_use]
    pub fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            if rule.pattern.matches(relative_path) {
                ignored = !rule.negate;
            }
        }
        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_pattern_ignores_matching_path() {
        let mut set = IgnoreSet::new();
        set.add_patterns("*.log\ntarget/\n");
        assert!(set.is_ignored("debug.log", false));
        assert!(set.is_ignored("target", true));
        assert!(!set.is_ignored("src/main.rs", false));
    }

    #[test]
    fn negation_overrides_earlier_rule() {
        let mut set = IgnoreSet::new();
        set.add_patterns("*.log\n!keep.log\n");
        assert!(set.is_ignored("debug.log", false));
        assert!(!set.is_ignored("keep.log", false));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut set = IgnoreSet::new();
        set.add_patterns("# comment\n\n*.tmp\n");
        assert!(set.is_ignored("scratch.tmp", false));
    }
}
