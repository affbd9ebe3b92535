//! Entry name selection for extraction.

use std::path::Path;

/// Check if a pattern contains glob wildcard characters.
pub fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
///
/// ```
/// use zippr::pattern::glob_match;
///
/// assert!(glob_match("*.txt", "readme.txt"));
/// assert!(glob_match("file?.dat", "file1.dat"));
/// assert!(!glob_match("*.txt", "readme.md"));
/// ```
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                // Let the last star swallow one more character and retry.
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Include/exclude selection of archive entries.
///
/// An empty include list selects everything. Include patterns without wildcards
/// match the full entry name or its base name; exclude patterns match as a glob
/// or as a substring.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl EntryFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn matches(&self, name: &str) -> bool {
        if !self.include.is_empty() {
            let included = self.include.iter().any(|f| {
                if has_glob_chars(f) {
                    glob_match(f, name)
                } else {
                    let basename = Path::new(name)
                        .file_name()
                        .map(|s| s.to_string_lossy())
                        .unwrap_or_default();
                    name == f.as_str() || basename == f.as_str()
                }
            });
            if !included {
                return false;
            }
        }

        !self
            .exclude
            .iter()
            .any(|x| name.contains(x.as_str()) || glob_match(x, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_basics() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything/at/all"));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "abd"));
        assert!(glob_match("??.rs", "ab.rs"));
        assert!(!glob_match("??.rs", "abc.rs"));
        assert!(glob_match("src/*/mod.rs", "src/zip/mod.rs"));
        assert!(glob_match("*a*b*", "xxaxxbxx"));
    }

    #[test]
    fn pathological_pattern_is_fast() {
        let text = "a".repeat(200);
        assert!(!glob_match("*a*a*a*a*a*a*a*a*b", &text));
    }

    #[test]
    fn filter_include_and_exclude() {
        let filter = EntryFilter::new(vec!["*.txt".into(), "Makefile".into()], vec!["skip".into()]);
        assert!(filter.matches("docs/a.txt"));
        assert!(filter.matches("build/Makefile"));
        assert!(!filter.matches("docs/a.md"));
        assert!(!filter.matches("skip/a.txt"));

        let all = EntryFilter::default();
        assert!(all.matches("whatever"));
    }
}
