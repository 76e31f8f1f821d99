//! Post-processing: deterministic cleanup of translated page text.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted models drift from the output contract in ways that are
//! harmless to a reader but break heading continuity across pages:
//!
//! - Wrapping the page in ` ```markdown ... ``` ` fences despite the prompt
//!   saying not to
//! - Emitting `# 2.1 Method` where the numbering says it is a second-level
//!   heading
//! - Returning `\r\n` line endings or zero-width characters copied from the
//!   source
//!
//! The rules here are cheap, pure `&str → String` passes. Heading depth in
//! particular is decided by the numbering, never by what the model chose, so
//! the headings fed back as context for the next page are consistent.
//!
//! ## Rule Order
//!
//! Fences are stripped and line endings normalised before heading correction
//! so that heading detection sees one heading per clean line.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to a raw provider response.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 5. Correct heading depth from the numeric label
/// 6. Collapse 3+ consecutive blank lines down to 2
pub fn clean_translation(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = remove_invisible_chars(&s);
    let s = correct_heading_levels(&s);
    collapse_blank_lines(&s).trim_matches('\n').to_string()
}

/// Every line starting with `#` (after trimming), in order.
pub fn extract_headers(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 5: Correct heading levels ──────────────────────────────────────────
//
// A heading line whose text opens with a numeric label such as `2.1`,
// followed by whitespace, gets exactly `1 + dots` markers. Labels with a
// trailing dot (`3.`) or no title, headings without a label, and lines
// without a marker are left alone.

static RE_NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*#+[ \t]*(\d+(?:\.\d+)*)([ \t].*)$").unwrap()
});

/// Heading depth implied by a numeric label: `"2.1.3"` → 3.
pub fn heading_depth(label: &str) -> usize {
    1 + label.matches('.').count()
}

/// Rewrite every numbered heading line to the depth its label implies.
pub fn correct_heading_levels(input: &str) -> String {
    input
        .lines()
        .map(|line| match RE_NUMBERED_HEADING.captures(line) {
            Some(caps) => {
                let label = &caps[1];
                format!("{} {}{}", "#".repeat(heading_depth(label)), label, &caps[2])
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        let input = "```markdown\n# 1 Hello\nWorld\n```";
        assert_eq!(strip_markdown_fences(input), "# 1 Hello\nWorld");
    }

    #[test]
    fn test_strip_fences_no_lang() {
        let input = "```\nWorld\n```";
        assert_eq!(strip_markdown_fences(input), "World");
    }

    #[test]
    fn test_inner_code_block_kept() {
        let input = "Text\n```rust\nfn main() {}\n```\nMore";
        assert_eq!(strip_markdown_fences(input), input);
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_heading_depth_follows_dots() {
        assert_eq!(correct_heading_levels("### 1 Intro"), "# 1 Intro");
        assert_eq!(correct_heading_levels("# 2.1 Method"), "## 2.1 Method");
        assert_eq!(correct_heading_levels("# 2.1.3 Setup"), "### 2.1.3 Setup");
        assert_eq!(correct_heading_levels("#2.1 Method"), "## 2.1 Method");
    }

    #[test]
    fn test_label_needs_following_whitespace() {
        assert_eq!(correct_heading_levels("### 3. Results"), "### 3. Results");
        assert_eq!(correct_heading_levels("#### 4.2"), "#### 4.2");
        assert_eq!(correct_heading_levels("# 2.1.Method"), "# 2.1.Method");
        assert_eq!(correct_heading_levels("#### 4.2\tTabbed"), "## 4.2\tTabbed");
    }

    #[test]
    fn test_unnumbered_lines_untouched() {
        let input = "## Abstract\nplain 2.1 text\n1.2 not a heading\n# 1st place";
        assert_eq!(correct_heading_levels(input), input);
    }

    #[test]
    fn test_extract_headers_in_order() {
        let text = "# 1 Intro\nbody\n  ## 1.1 Scope  \nmore\n## Notes";
        assert_eq!(
            extract_headers(text),
            vec!["# 1 Intro", "## 1.1 Scope", "## Notes"]
        );
        assert!(extract_headers("no headings here").is_empty());
    }

    #[test]
    fn test_clean_translation_full_pipeline() {
        let input = "```markdown\r\n# 2.1 関連研究   \r\n\r\n\r\n\r\n\r\n本文\u{200B}\r\n```";
        let result = clean_translation(input);
        assert_eq!(result, "## 2.1 関連研究\n\n\n本文");
        assert_eq!(extract_headers(&result), vec!["## 2.1 関連研究"]);
    }
}
