//! Translation prompts.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing the heading rules or the
//!    continuity wording means editing exactly one place.
//!
//! 2. **Testability**: unit tests inspect the composed prompt directly
//!    without a live backend, so prompt regressions are easy to catch.
//!
//! The prompt carries three things: the translation rules (target language,
//! heading depth by numbering, no code fences), an optional continuity block
//! listing the headings of earlier pages, and the page text itself.

/// Rules sent with every page. `{language}` is replaced with the target
/// language name.
pub const TRANSLATION_RULES: &str = r####"Translate the following page into {language}.

Follow these rules precisely:

1. CONTENT
   - Translate ALL text; do not summarise or omit anything
   - Keep formulas, numbers, URLs and code unchanged
   - Keep Markdown tables, lists and emphasis as they are

2. HEADINGS
   - Use the numbering of a heading to choose its level
   - "1 Title" becomes "# 1 Title"
   - "2.1 Title" becomes "## 2.1 Title"
   - "3.1.2 Title" becomes "### 3.1.2 Title"
   - Keep the original numbering

3. OUTPUT FORMAT
   - Output ONLY the translated page
   - Do NOT wrap the output in ``` fences
   - Do NOT add commentary or explanations"####;

/// Heading shown before the list of previous headings.
pub const CONTINUITY_INSTRUCTION: &str =
    "Headings already used on earlier pages. Keep their numbering and levels consistent:";

/// Label that introduces the page text.
pub const PAGE_LABEL: &str = "Page to translate:";

/// English name for an ISO 639-1 code, falling back to the input.
pub fn language_name(code: &str) -> &str {
    match code.trim().to_ascii_lowercase().as_str() {
        "ja" => "Japanese",
        "en" => "English",
        "zh" | "zh-cn" => "Simplified Chinese",
        "zh-tw" => "Traditional Chinese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "vi" => "Vietnamese",
        "th" => "Thai",
        "id" => "Indonesian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        _ => code.trim(),
    }
}

/// Continuity block listing `previous_headers` verbatim, newline-joined.
///
/// Empty when there are no previous headings.
pub fn continuity_block(previous_headers: &[String]) -> String {
    if previous_headers.is_empty() {
        return String::new();
    }
    format!(
        "\n{}\n{}\n",
        CONTINUITY_INSTRUCTION,
        previous_headers.join("\n")
    )
}

/// Compose the full prompt for one page.
pub fn translation_prompt(
    text: &str,
    target_language: &str,
    previous_headers: &[String],
    custom_instructions: Option<&str>,
) -> String {
    let mut prompt = TRANSLATION_RULES.replace("{language}", language_name(target_language));

    if let Some(extra) = custom_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("\n\n4. ADDITIONAL INSTRUCTIONS\n");
        prompt.push_str(extra);
    }

    prompt.push_str("\n\n---\n");
    prompt.push_str(&continuity_block(previous_headers));
    prompt.push_str("---\n\n");
    prompt.push_str(PAGE_LABEL);
    prompt.push('\n');
    prompt.push_str(text);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_codes_resolve() {
        assert_eq!(language_name("ja"), "Japanese");
        assert_eq!(language_name(" EN "), "English");
        assert_eq!(language_name("Klingon"), "Klingon");
    }

    #[test]
    fn continuity_block_is_verbatim_and_ordered() {
        let headers = vec!["# 1 Intro".to_string(), "## 1.1 Scope".to_string()];
        let block = continuity_block(&headers);
        assert!(block.contains("# 1 Intro\n## 1.1 Scope"));
        assert!(continuity_block(&[]).is_empty());
    }

    #[test]
    fn prompt_contains_rules_context_and_page() {
        let headers = vec!["# 1 Intro".to_string()];
        let p = translation_prompt("2.1 Related work", "ja", &headers, None);
        assert!(p.starts_with("Translate the following page into Japanese."));
        assert!(p.contains("# 1 Intro"));
        assert!(p.ends_with("Page to translate:\n2.1 Related work"));
        assert!(!p.contains("ADDITIONAL INSTRUCTIONS"));
    }

    #[test]
    fn rules_keep_every_heading_example_intact() {
        let p = translation_prompt("x", "ja", &[], None);
        assert!(p.contains(r##"- "1 Title" becomes "# 1 Title""##));
        assert!(p.contains(r###"- "2.1 Title" becomes "## 2.1 Title""###));
        assert!(p.contains(r####"- "3.1.2 Title" becomes "### 3.1.2 Title""####));
        assert!(p.contains("- Do NOT add commentary or explanations\n\n---\n"));
    }

    #[test]
    fn custom_instructions_are_appended() {
        let p = translation_prompt("x", "fr", &[], Some("Use formal register."));
        assert!(p.contains("ADDITIONAL INSTRUCTIONS\nUse formal register."));
        let p = translation_prompt("x", "fr", &[], Some("   "));
        assert!(!p.contains("ADDITIONAL INSTRUCTIONS"));
    }
}
