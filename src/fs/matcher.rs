//! Path matching for wrapped paths
//!
//! Patterns take the form `syntax:pattern` with syntax `glob` or `regex`.
//! Matching is done on the physical path string, so a matcher from one
//! mount never matches paths of another.
//!
//! Glob rules: `*` matches within one component, `**` across components,
//! `?` one character other than `/`, `[abc]` / `[a-z]` / `[!abc]` one
//! character of a class, `{a,b}` any alternative, `\` escapes.

use crate::error::{Error, Result};
use crate::fs::{EncPath, EncryptedFs};
use regex::Regex;
use std::sync::Arc;

/// Compiled pattern bound to one mount
#[derive(Debug, Clone)]
pub struct PathMatcher {
    mount: Arc<EncryptedFs>,
    regex: Regex,
}

impl PathMatcher {
    pub(crate) fn new(mount: &Arc<EncryptedFs>, syntax_and_pattern: &str) -> Result<Self> {
        let (syntax, pattern) = syntax_and_pattern.split_once(':').ok_or_else(|| {
            Error::InvalidPattern(format!(
                "'{}' is not of the form syntax:pattern",
                syntax_and_pattern
            ))
        })?;

        let source = match syntax.to_ascii_lowercase().as_str() {
            "glob" => glob_to_regex(pattern)?,
            "regex" => format!("^(?:{})$", pattern),
            other => {
                return Err(Error::Unsupported(format!("path matcher syntax '{}'", other)));
            }
        };
        let regex = Regex::new(&source)
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))?;

        Ok(PathMatcher {
            mount: Arc::clone(mount),
            regex,
        })
    }

    /// Whether `path` belongs to this matcher's mount and matches the pattern
    pub fn matches(&self, path: &EncPath) -> bool {
        if !path.belongs_to(&self.mount) {
            return false;
        }
        path.as_physical()
            .to_str()
            .map(|s| self.regex.is_match(s))
            .unwrap_or(false)
    }
}

/// Translate a glob into an anchored regular expression
fn glob_to_regex(glob: &str) -> Result<String> {
    let invalid = |msg: &str| Error::InvalidPattern(format!("{} in glob '{}'", msg, glob));

    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    let mut in_group = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                out.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
            }
            '*' => {
                if chars.next_if_eq(&'*').is_some() {
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '[' => {
                // Negated classes still never match the separator.
                let negated = chars.next_if_eq(&'!').is_some();
                if negated {
                    out.push_str("[[^/]&&[^");
                } else {
                    out.push('[');
                }

                let mut closed = false;
                let mut empty = true;
                for c in chars.by_ref() {
                    match c {
                        ']' if !empty => {
                            closed = true;
                            break;
                        }
                        '/' => return Err(invalid("'/' inside a bracket expression")),
                        '\\' | '[' | ']' | '&' | '~' | '^' => {
                            out.push('\\');
                            out.push(c);
                        }
                        c => out.push(c),
                    }
                    empty = false;
                }
                if !closed {
                    return Err(invalid("unclosed bracket expression"));
                }
                out.push_str(if negated { "]]" } else { "]" });
            }
            '{' if in_group => return Err(invalid("nested group")),
            '{' => {
                in_group = true;
                out.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }

    if in_group {
        return Err(invalid("unclosed group"));
    }
    out.push('$');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use crate::crypto::SecretKey;

    fn mount() -> Arc<EncryptedFs> {
        let options = MountOptions::aes_ctr(SecretKey::new(vec![4u8; 16])).with_root("/data");
        EncryptedFs::from_options("enc", &options).unwrap()
    }

    #[test]
    fn test_glob_star_stays_in_component() {
        let fs = mount();
        let m = fs.path_matcher("glob:/data/*.txt").unwrap();
        assert!(m.matches(&fs.path("/data/a.txt")));
        assert!(!m.matches(&fs.path("/data/sub/a.txt")));
        assert!(!m.matches(&fs.path("/data/a.txt.bak")));

        let m = fs.path_matcher("glob:/data/**.txt").unwrap();
        assert!(m.matches(&fs.path("/data/sub/deep/a.txt")));
    }

    #[test]
    fn test_glob_classes_and_groups() {
        let fs = mount();
        let m = fs.path_matcher("glob:/data/file?.{rs,toml}").unwrap();
        assert!(m.matches(&fs.path("/data/file1.rs")));
        assert!(m.matches(&fs.path("/data/fileX.toml")));
        assert!(!m.matches(&fs.path("/data/file10.rs")));
        assert!(!m.matches(&fs.path("/data/file1.md")));

        let m = fs.path_matcher("glob:/data/[a-c]*").unwrap();
        assert!(m.matches(&fs.path("/data/beta")));
        assert!(!m.matches(&fs.path("/data/delta")));

        let m = fs.path_matcher("glob:/data/x[!0-9]").unwrap();
        assert!(m.matches(&fs.path("/data/xa")));
        assert!(!m.matches(&fs.path("/data/x1")));

        let m = fs.path_matcher(r"glob:/data/\*").unwrap();
        assert!(m.matches(&fs.path("/data/*")));
        assert!(!m.matches(&fs.path("/data/a")));
    }

    #[test]
    fn test_regex_syntax() {
        let fs = mount();
        let m = fs.path_matcher(r"regex:/data/\d+").unwrap();
        assert!(m.matches(&fs.path("/data/42")));
        assert!(!m.matches(&fs.path("/data/42a")));
    }

    #[test]
    fn test_foreign_paths_never_match() {
        let fs = mount();
        let other = mount();
        let m = fs.path_matcher("glob:**").unwrap();
        assert!(m.matches(&fs.path("/data/a")));
        assert!(!m.matches(&other.path("/data/a")));
    }

    #[test]
    fn test_invalid_patterns() {
        let fs = mount();
        assert!(matches!(fs.path_matcher("*.txt"), Err(Error::InvalidPattern(_))));
        assert!(matches!(fs.path_matcher("glob:[abc"), Err(Error::InvalidPattern(_))));
        assert!(matches!(fs.path_matcher("glob:{a,{b}}"), Err(Error::InvalidPattern(_))));
        assert!(matches!(fs.path_matcher("glob:a\\"), Err(Error::InvalidPattern(_))));
        assert!(matches!(fs.path_matcher("regex:("), Err(Error::InvalidPattern(_))));
        assert!(matches!(fs.path_matcher("sql:%"), Err(Error::Unsupported(_))));
    }
}
