//! Gitignore-style path exclusion.
//!
//! Rules are evaluated in order and the last matching rule wins:
//!
//! | Pattern      | Meaning                                              |
//! |--------------|------------------------------------------------------|
//! | `*.log`      | any file or directory named `*.log`, at any depth    |
//! | `/build`     | `build` directly under the index root only           |
//! | `docs/*.md`  | contains a slash, so anchored at the root            |
//! | `tmp/`       | directories only                                     |
//! | `!keep.log`  | re-include something an earlier rule excluded        |
//! | `# note`     | comment                                              |
//!
//! As with git, a file inside an excluded directory cannot be re-included.
//! `.git/`, `target/` and `node_modules/` are always excluded.

use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path};

use crate::error::{RagError, Result};

pub const DEFAULT_IGNORES: &[&str] = &[".git/", "target/", "node_modules/"];

#[derive(Debug, Clone)]
struct Rule {
    matcher: GlobMatcher,
    negate: bool,
    dir_only: bool,
}

/// A compiled, ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// Compile `patterns` after the built-in defaults.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut rules = IgnoreRules::default();
        for pattern in DEFAULT_IGNORES {
            rules.add(pattern)?;
        }
        for pattern in patterns {
            rules.add(pattern.as_ref())?;
        }
        Ok(rules)
    }

    /// Compile `patterns`, then the lines of `root/ignore_file` if that file
    /// exists.
    pub fn load<S: AsRef<str>>(root: &Path, patterns: &[S], ignore_file: &str) -> Result<Self> {
        let mut rules = Self::new(patterns)?;
        if ignore_file.is_empty() {
            return Ok(rules);
        }
        let path = root.join(ignore_file);
        if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            for line in content.lines() {
                rules.add(line)?;
            }
            tracing::debug!(path = %path.display(), rules = rules.len(), "loaded ignore file");
        }
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Add one pattern line. Blank lines and comments are accepted and
    /// ignored.
    pub fn add(&mut self, line: &str) -> Result<()> {
        let mut pattern = line.trim_end();
        if pattern.trim_start().is_empty() || pattern.starts_with('#') {
            return Ok(());
        }

        let negate = pattern.starts_with('!');
        if negate {
            pattern = &pattern[1..];
        } else if let Some(rest) = pattern.strip_prefix('\\') {
            // `\#` and `\!` escape a leading literal.
            pattern = rest;
        }

        let dir_only = pattern.ends_with('/');
        let pattern = pattern.trim_end_matches('/');

        let anchored = pattern.starts_with('/') || pattern.contains('/');
        let pattern = pattern.trim_start_matches('/');
        if pattern.is_empty() {
            return Ok(());
        }

        let glob = if anchored {
            pattern.to_string()
        } else {
            format!("**/{}", pattern)
        };

        let matcher = GlobBuilder::new(&glob)
            .literal_separator(true)
            .build()
            .map_err(|e| RagError::InvalidInput(format!("invalid ignore pattern '{}': {}", line, e)))?
            .compile_matcher();

        self.rules.push(Rule {
            matcher,
            negate,
            dir_only,
        });
        Ok(())
    }

    /// Decide a single path without looking at its ancestors. `relative` is
    /// relative to the index root.
    pub fn matches(&self, relative: &Path, is_dir: bool) -> bool {
        let candidate = to_slash(relative);
        if candidate.is_empty() {
            return false;
        }
        let mut ignored = false;
        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            if rule.matcher.is_match(&candidate) {
                ignored = !rule.negate;
            }
        }
        ignored
    }

    /// Whether `relative` is excluded, either directly or because one of its
    /// parent directories is.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        let mut prefix = std::path::PathBuf::new();
        let components: Vec<_> = relative.components().collect();
        for (i, component) in components.iter().enumerate() {
            prefix.push(component.as_os_str());
            let last = i + 1 == components.len();
            if last {
                return self.matches(&prefix, is_dir);
            }
            if self.matches(&prefix, true) {
                return true;
            }
        }
        false
    }
}

/// Forward-slash form of a relative path, as patterns expect.
fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rules(patterns: &[&str]) -> IgnoreRules {
        IgnoreRules::new(patterns).unwrap()
    }

    #[test]
    fn test_defaults_exclude_vcs_and_build_dirs() {
        let r = rules(&[]);
        assert!(r.is_ignored(Path::new(".git/config"), false));
        assert!(r.is_ignored(Path::new("crates/a/target/debug/x.rs"), false));
        assert!(r.is_ignored(Path::new("web/node_modules"), true));
        assert!(!r.is_ignored(Path::new("src/target.rs"), false));
    }

    #[test]
    fn test_unanchored_matches_at_any_depth() {
        let r = rules(&["*.log"]);
        assert!(r.is_ignored(Path::new("a.log"), false));
        assert!(r.is_ignored(Path::new("deep/er/b.log"), false));
        assert!(!r.is_ignored(Path::new("a.md"), false));
    }

    #[test]
    fn test_leading_slash_anchors_to_root() {
        let r = rules(&["/build"]);
        assert!(r.is_ignored(Path::new("build/out.txt"), false));
        assert!(!r.is_ignored(Path::new("src/build/out.txt"), false));
    }

    #[test]
    fn test_inner_slash_anchors_to_root() {
        let r = rules(&["docs/*.md"]);
        assert!(r.is_ignored(Path::new("docs/a.md"), false));
        assert!(!r.is_ignored(Path::new("x/docs/a.md"), false));
        assert!(!r.is_ignored(Path::new("docs/sub/a.md"), false));
    }

    #[test]
    fn test_trailing_slash_is_directory_only() {
        let r = rules(&["cache/"]);
        assert!(r.matches(Path::new("cache"), true));
        assert!(!r.matches(Path::new("cache"), false));
        assert!(r.is_ignored(Path::new("a/cache/file.txt"), false));
    }

    #[test]
    fn test_negation_last_match_wins() {
        let r = rules(&["*.txt", "!keep.txt"]);
        assert!(r.is_ignored(Path::new("drop.txt"), false));
        assert!(!r.is_ignored(Path::new("keep.txt"), false));
        assert!(!r.is_ignored(Path::new("sub/keep.txt"), false));

        let r = rules(&["!keep.txt", "*.txt"]);
        assert!(r.is_ignored(Path::new("keep.txt"), false));
    }

    #[test]
    fn test_cannot_reinclude_inside_excluded_dir() {
        let r = rules(&["vendor/", "!vendor/keep.md"]);
        assert!(r.is_ignored(Path::new("vendor/keep.md"), false));
    }

    #[test]
    fn test_comments_and_blanks_are_skipped() {
        let r = rules(&["# comment", "", "   ", "\\#literal"]);
        assert_eq!(r.len(), DEFAULT_IGNORES.len() + 1);
        assert!(r.is_ignored(Path::new("#literal"), false));
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(matches!(
            IgnoreRules::new(&["a[b"]),
            Err(RagError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_reads_ignore_file_after_config() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".cragignore"), "# local\n!important.log\nsecret/\n").unwrap();
        let r = IgnoreRules::load(tmp.path(), &["*.log"], ".cragignore").unwrap();
        assert!(r.is_ignored(Path::new("debug.log"), false));
        assert!(!r.is_ignored(Path::new("important.log"), false));
        assert!(r.is_ignored(Path::new("secret/a.md"), false));
    }
}
