//! Pure string parsing of optimizer output. No I/O, never fails.

use std::sync::OnceLock;

use regex::Regex;

/// Generated lines this short (in chars) are chatter, not prompts.
const MIN_PROMPT_CHARS: usize = 10;

/// Lines opening with these (case-insensitive) are preamble, e.g. "Here are 5 prompts:".
const FILLER_PREFIXES: &[&str] = &["here", "sure", "certainly"];

const QUOTES: &[char] = &['"', '\'', '“', '”'];

/// Returns the trimmed bodies of every `<TAG_BEGIN> … </TAG_END>` block, in order.
///
/// Matching is case-insensitive and spans newlines. If the strict form finds
/// nothing, a looser form accepting spaces instead of `_` and stray whitespace
/// inside the angle brackets is tried.
pub fn extract_tags(text: &str, tag: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let tag = regex::escape(tag);

    let strict = format!(r"(?is)<{tag}_BEGIN>(.*?)</{tag}_END>");
    let found = captures(&strict, text);
    if !found.is_empty() {
        return found;
    }

    let loose = format!(r"(?is)<\s*{tag}[\s_]+BEGIN\s*>(.*?)<\s*/\s*{tag}[\s_]+END\s*>");
    captures(&loose, text)
}

fn captures(pattern: &str, text: &str) -> Vec<String> {
    match Regex::new(pattern) {
        Ok(re) => re
            .captures_iter(text)
            .map(|c| c[1].trim().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn enumeration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\s*[.)]\s*").expect("enumeration pattern is valid"))
}

/// Turns a free-form multi-line generation into at most `count` prompts.
///
/// Per line: trim, drop short or filler lines, strip surrounding quotes and a
/// leading `1.` / `1)` marker.
pub fn clean_generated_lines(raw: &str, count: usize) -> Vec<String> {
    raw.lines()
        .filter_map(clean_line)
        .take(count)
        .collect()
}

fn clean_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.chars().count() <= MIN_PROMPT_CHARS {
        return None;
    }
    let lower = line.to_lowercase();
    if FILLER_PREFIXES.iter().any(|f| lower.starts_with(f)) {
        return None;
    }

    let line = line.trim_matches(QUOTES).trim();
    let line = enumeration_re().replace(line, "");
    let line = line.trim().trim_matches(QUOTES).trim();

    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_standard_tags_in_order() {
        let text = "Diagnosis: too vague.\n<REWRITE_BEGIN>\n  Solve step by step.  \n</REWRITE_END>\n\
                    <REWRITE_BEGIN>Answer with one letter.</REWRITE_END>";
        assert_eq!(
            extract_tags(text, "REWRITE"),
            vec!["Solve step by step.", "Answer with one letter."]
        );
    }

    #[test]
    fn test_extract_is_case_insensitive() {
        let text = "<rewrite_begin>lower</rewrite_end>";
        assert_eq!(extract_tags(text, "REWRITE"), vec!["lower"]);
    }

    #[test]
    fn test_extract_loose_whitespace_variant() {
        let text = "< REWRITE BEGIN >spaced</ REWRITE END>\n<REWRITE  BEGIN>double</REWRITE END >";
        assert_eq!(extract_tags(text, "REWRITE"), vec!["spaced", "double"]);
    }

    #[test]
    fn test_extract_ignores_unterminated_block() {
        let text = "<REWRITE_BEGIN>complete</REWRITE_END>\n<REWRITE_BEGIN>cut off mid-sent";
        assert_eq!(extract_tags(text, "REWRITE"), vec!["complete"]);
    }

    #[test]
    fn test_extract_nothing() {
        assert!(extract_tags("", "REWRITE").is_empty());
        assert!(extract_tags("I think you should say it differently.", "REWRITE").is_empty());
        assert!(extract_tags("</REWRITE_END> backwards <REWRITE_BEGIN>", "REWRITE").is_empty());
    }

    #[test]
    fn test_extract_escapes_tag_name() {
        let text = "<A.B_BEGIN>dot</A.B_END><AXB_BEGIN>not me</AXB_END>";
        assert_eq!(extract_tags(text, "A.B"), vec!["dot"]);
    }

    #[test]
    fn test_clean_generated_lines() {
        let raw = "Here are 4 instructions:\n\
                   1. Work through the problem step by step before answering.\n\
                   \n\
                   2) \"Restate the question, then give only the final letter.\"\n\
                   Short one\n\
                   'Check each option against the facts given.'\n\
                   Sure, happy to help with more!";
        assert_eq!(
            clean_generated_lines(raw, 10),
            vec![
                "Work through the problem step by step before answering.",
                "Restate the question, then give only the final letter.",
                "Check each option against the facts given.",
            ]
        );
    }

    #[test]
    fn test_clean_respects_count() {
        let raw = "Think carefully about units.\nShow all intermediate results.\nDouble-check arithmetic.";
        assert_eq!(clean_generated_lines(raw, 2).len(), 2);
        assert!(clean_generated_lines(raw, 0).is_empty());
    }

    #[test]
    fn test_clean_keeps_numbers_inside_prompt() {
        let raw = "Use at most 3 sentences (and cite 1 fact).";
        assert_eq!(
            clean_generated_lines(raw, 1),
            vec!["Use at most 3 sentences (and cite 1 fact)."]
        );
    }
}
