//! Document selectors: which documents a provider is willing to serve

use crate::model::DocumentModel;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Translate a glob into an anchored regex.
///
/// Supports `*` (within a segment), `**` (across segments, `**/` may match
/// nothing), `?`, `{a,b}` alternatives and `[...]` classes (`[!...]` negates).
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut group_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:.*/)?");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '{' => {
                group_depth += 1;
                regex.push_str("(?:");
            }
            '}' if group_depth > 0 => {
                group_depth -= 1;
                regex.push(')');
            }
            ',' if group_depth > 0 => regex.push('|'),
            '[' => {
                let class: String = chars.by_ref().take_while(|&ch| ch != ']').collect();
                let class = match class.strip_prefix('!') {
                    Some(negated) => format!("^{negated}"),
                    None => class,
                };
                regex.push('[');
                regex.push_str(&class.replace('\\', "\\\\"));
                regex.push(']');
            }
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }

    regex.push('$');
    Regex::new(&regex)
}

/// A compiled glob. Patterns without a `/` match the file name only.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
    file_name_only: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, SelectorError> {
        let regex = glob_to_regex(pattern).map_err(|source| SelectorError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            file_name_only: !pattern.contains('/'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a `/`-separated path
    pub fn is_match(&self, path: &str) -> bool {
        if self.file_name_only {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            self.regex.is_match(file_name)
        } else {
            self.regex.is_match(path)
        }
    }
}

/// Wire form of a single filter; every absent field matches anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Wire form of a selector: a language id, a filter, or a list of either
// `Many` must precede `Filter`: a struct also deserializes from a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    Language(String),
    Many(Vec<SelectorSpec>),
    Filter(DocumentFilter),
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    language: Option<String>,
    scheme: Option<String>,
    pattern: Option<GlobPattern>,
}

impl CompiledFilter {
    fn compile(filter: DocumentFilter) -> Result<Self, SelectorError> {
        Ok(Self {
            language: filter.language.filter(|language| language != "*"),
            scheme: filter.scheme,
            pattern: filter.pattern.as_deref().map(GlobPattern::new).transpose()?,
        })
    }

    fn matches(&self, document: &DocumentModel) -> bool {
        if let Some(language) = &self.language
            && language != document.language_id()
        {
            return false;
        }
        if let Some(scheme) = &self.scheme
            && scheme != document.uri().scheme()
        {
            return false;
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(document.uri().path()),
            None => true,
        }
    }
}

/// Compiled selector; matches if any filter matches
#[derive(Debug, Clone)]
pub struct DocumentSelector {
    filters: Vec<CompiledFilter>,
}

impl DocumentSelector {
    pub fn compile(spec: SelectorSpec) -> Result<Self, SelectorError> {
        let mut filters = Vec::new();
        Self::flatten(spec, &mut filters)?;
        Ok(Self { filters })
    }

    fn flatten(spec: SelectorSpec, filters: &mut Vec<CompiledFilter>) -> Result<(), SelectorError> {
        match spec {
            SelectorSpec::Language(language) => filters.push(CompiledFilter::compile(DocumentFilter {
                language: Some(language),
                ..Default::default()
            })?),
            SelectorSpec::Filter(filter) => filters.push(CompiledFilter::compile(filter)?),
            SelectorSpec::Many(specs) => {
                for spec in specs {
                    Self::flatten(spec, filters)?;
                }
            }
        }
        Ok(())
    }

    pub fn language(language: &str) -> Self {
        Self {
            filters: vec![CompiledFilter {
                language: Some(language.to_string()).filter(|l| l != "*"),
                scheme: None,
                pattern: None,
            }],
        }
    }

    /// Matches every document
    pub fn any() -> Self {
        Self::language("*")
    }

    pub fn matches(&self, document: &DocumentModel) -> bool {
        self.filters.iter().any(|filter| filter.matches(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentUri;

    fn doc(uri: &str, language: &str) -> DocumentModel {
        DocumentModel::new(DocumentUri::parse(uri).unwrap(), language, 1, String::new())
    }

    fn compile(json: &str) -> DocumentSelector {
        DocumentSelector::compile(serde_json::from_str(json).unwrap()).unwrap()
    }

    #[test]
    fn test_glob_segments() {
        let re = glob_to_regex("src/*.rs").unwrap();
        assert!(re.is_match("src/main.rs"));
        assert!(!re.is_match("src/bin/main.rs"));

        let re = glob_to_regex("**/*.rs").unwrap();
        assert!(re.is_match("main.rs"));
        assert!(re.is_match("/home/u/src/bin/main.rs"));

        let re = glob_to_regex("file?.txt").unwrap();
        assert!(re.is_match("file1.txt"));
        assert!(!re.is_match("file10.txt"));
    }

    #[test]
    fn test_glob_alternatives_and_classes() {
        let re = glob_to_regex("**/*.{ts,tsx}").unwrap();
        assert!(re.is_match("/a/b.ts"));
        assert!(re.is_match("/a/b.tsx"));
        assert!(!re.is_match("/a/b.js"));

        let re = glob_to_regex("v[0-9].txt").unwrap();
        assert!(re.is_match("v3.txt"));
        let re = glob_to_regex("v[!0-9].txt").unwrap();
        assert!(!re.is_match("v3.txt"));
        assert!(re.is_match("vx.txt"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("a+b(c).txt").unwrap();
        assert!(re.is_match("a+b(c).txt"));
        assert!(!re.is_match("aab(c)xtxt"));
    }

    #[test]
    fn test_unbalanced_group_is_error() {
        assert!(GlobPattern::new("*.{rs,toml").is_err());
    }

    #[test]
    fn test_language_shorthand() {
        let selector = compile(r#""python""#);
        assert!(selector.matches(&doc("file:///a.py", "python")));
        assert!(!selector.matches(&doc("file:///a.go", "go")));
    }

    #[test]
    fn test_wildcard_language() {
        assert!(DocumentSelector::any().matches(&doc("untitled:x", "anything")));
        assert!(compile(r#"{"language":"*"}"#).matches(&doc("file:///x", "go")));
    }

    #[test]
    fn test_three_part_filter() {
        let selector = compile(r#"{"language":"rust","scheme":"file","pattern":"**/src/**/*.rs"}"#);
        assert!(selector.matches(&doc("file:///repo/src/lib.rs", "rust")));
        assert!(!selector.matches(&doc("file:///repo/tests/it.rs", "rust")));
        assert!(!selector.matches(&doc("untitled:/repo/src/lib.rs", "rust")));
        assert!(!selector.matches(&doc("file:///repo/src/lib.rs", "toml")));
    }

    #[test]
    fn test_pattern_without_slash_matches_file_name() {
        let selector = compile(r#"{"pattern":"*.md"}"#);
        assert!(selector.matches(&doc("file:///docs/deep/README.md", "markdown")));
    }

    #[test]
    fn test_list_matches_any_filter() {
        let selector = compile(r#"["go", {"scheme":"untitled"}]"#);
        assert!(selector.matches(&doc("file:///a.go", "go")));
        assert!(selector.matches(&doc("untitled:Untitled-1", "plaintext")));
        assert!(!selector.matches(&doc("file:///a.py", "python")));
    }

    #[test]
    fn test_empty_list_matches_nothing() {
        assert!(!compile("[]").matches(&doc("file:///a.go", "go")));
    }
}
