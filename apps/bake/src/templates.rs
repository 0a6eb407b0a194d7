//! Template Store: named optimizer templates with `{placeholder}` slots.
//!
//! Built-in defaults live in `engine::prompts`. A template directory can
//! override any of them: `<dir>/<key>.txt` replaces the template named `key`.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::engine::prompts::{
    ANALYZE_AND_REWRITE_TEMPLATE, COMBINE_RULES_TEMPLATE, PROMPT_GENERATION_TEMPLATE,
    RULE_SUMMARIZATION_TEMPLATE,
};

pub const ANALYZE_AND_REWRITE: &str = "analyze_and_rewrite";
pub const RULE_SUMMARIZATION: &str = "rule_summarization";
pub const COMBINE_RULES: &str = "combine_rules";
pub const PROMPT_GENERATION: &str = "prompt_generation";

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("template references placeholder '{{{0}}}' but no value was supplied")]
    MissingPlaceholder(String),

    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),
}

#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<String, String>,
}

impl TemplateStore {
    pub fn with_defaults() -> Self {
        let templates = [
            (ANALYZE_AND_REWRITE, ANALYZE_AND_REWRITE_TEMPLATE),
            (RULE_SUMMARIZATION, RULE_SUMMARIZATION_TEMPLATE),
            (COMBINE_RULES, COMBINE_RULES_TEMPLATE),
            (PROMPT_GENERATION, PROMPT_GENERATION_TEMPLATE),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }

    /// Loads every `*.txt` in `dir` over the current set, keyed by file stem.
    pub fn load_overrides(&mut self, dir: &Path) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path)?;
            self.insert(key, text.trim());
            loaded += 1;
        }
        info!("Loaded {loaded} template override(s) from {}", dir.display());
        Ok(loaded)
    }

    pub fn insert(&mut self, key: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(key.into(), template.into());
    }

    /// Missing keys yield the empty string.
    pub fn get(&self, key: &str) -> &str {
        self.templates.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Substitutes `{name}` slots from `vars`. `{{` and `}}` produce literal braces.
///
/// Every slot named in the template must be supplied; extra vars are ignored.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    if n == '{' {
                        return Err(FormatError::UnbalancedBrace(pos));
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(FormatError::UnbalancedBrace(pos));
                }
                let value = vars
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| *v)
                    .ok_or(FormatError::MissingPlaceholder(name))?;
                out.push_str(value);
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(FormatError::UnbalancedBrace(pos));
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fill_substitutes_all_slots() {
        let out = fill("Rewrite {num} prompts. {num} in total.", &[("num", "3")]).unwrap();
        assert_eq!(out, "Rewrite 3 prompts. 3 in total.");
    }

    #[test]
    fn test_fill_missing_placeholder_is_error() {
        let err = fill("Rules:\n{rules_block}", &[("num", "2")]).unwrap_err();
        assert_eq!(err, FormatError::MissingPlaceholder("rules_block".to_string()));
    }

    #[test]
    fn test_fill_escaped_braces() {
        let out = fill(r#"Return {{"n": {num}}}"#, &[("num", "5")]).unwrap();
        assert_eq!(out, r#"Return {"n": 5}"#);
    }

    #[test]
    fn test_fill_unbalanced_braces() {
        assert!(matches!(fill("oops {num", &[("num", "1")]), Err(FormatError::UnbalancedBrace(5))));
        assert!(matches!(fill("oops }", &[]), Err(FormatError::UnbalancedBrace(5))));
    }

    #[test]
    fn test_fill_does_not_rescan_substituted_values() {
        let out = fill("{a}", &[("a", "{b}")]).unwrap();
        assert_eq!(out, "{b}");
    }

    #[test]
    fn test_defaults_fill_with_their_own_slots() {
        let store = TemplateStore::with_defaults();
        assert!(fill(store.get(ANALYZE_AND_REWRITE), &[("num", "2")]).is_ok());
        assert!(fill(store.get(RULE_SUMMARIZATION), &[("pairs_block", "x")]).is_ok());
        assert!(fill(store.get(COMBINE_RULES), &[("rules_block", "x")]).is_ok());
        assert!(fill(
            store.get(PROMPT_GENERATION),
            &[("rules_block", "x"), ("num", "3")]
        )
        .is_ok());
    }

    #[test]
    fn test_missing_key_is_empty() {
        assert_eq!(TemplateStore::default().get("nope"), "");
    }

    #[test]
    fn test_directory_overrides_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("combine_rules.txt")).unwrap();
        writeln!(f, "  Merge these:\n{{rules_block}}  ").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let mut store = TemplateStore::with_defaults();
        assert_eq!(store.load_overrides(dir.path()).unwrap(), 1);
        assert_eq!(store.get(COMBINE_RULES), "Merge these:\n{rules_block}");
        assert_eq!(store.get("notes"), "");
    }
}
