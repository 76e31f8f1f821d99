//! Unicode safety: detect and repair text a backend would reject.
//!
//! ## Why UTF-16 code units?
//!
//! Text extractors regularly emit *unpaired surrogates*: half of a
//! supplementary-plane character, typically a styled mathematical letter
//! whose high and low halves were split across two glyph runs. A Rust
//! `String` cannot hold such a value, so [`PageText`] keeps the page as raw
//! UTF-16 code units until [`normalize`] has turned it into something that
//! strict UTF-8 accepts.
//!
//! ## Pipeline
//!
//! ```text
//! PageText ─ NFD ─ math letters → ASCII ─ lone surrogates (strip | '?') ─ strict decode ─ NFC ─ String
//! ```

use std::fmt;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Character substituted for an unpaired surrogate in conservative mode.
pub const PLACEHOLDER: char = '?';

/// Source text of one page, kept as UTF-16 code units.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PageText {
    units: Vec<u16>,
}

impl PageText {
    /// Wrap raw UTF-16 code units. Unpaired surrogates are allowed.
    pub fn from_utf16(units: Vec<u16>) -> Self {
        Self { units }
    }

    /// Decode bytes that are UTF-8 except for surrogates encoded as
    /// three-byte sequences (WTF-8 / CESU-8). Other invalid bytes become
    /// U+FFFD since they never denote a code point.
    pub fn from_wtf8_lossy(bytes: &[u8]) -> Self {
        let mut units = Vec::with_capacity(bytes.len());
        let mut start = 0;
        let mut i = 0;
        while i + 2 < bytes.len() {
            if bytes[i] == 0xED
                && (0xA0..=0xBF).contains(&bytes[i + 1])
                && (0x80..=0xBF).contains(&bytes[i + 2])
            {
                units.extend(String::from_utf8_lossy(&bytes[start..i]).encode_utf16());
                units.push(
                    0xD000 | ((u16::from(bytes[i + 1]) & 0x3F) << 6) | (u16::from(bytes[i + 2]) & 0x3F),
                );
                i += 3;
                start = i;
            } else {
                i += 1;
            }
        }
        units.extend(String::from_utf8_lossy(&bytes[start..]).encode_utf16());
        Self { units }
    }

    pub fn as_units(&self) -> &[u16] {
        &self.units
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of UTF-16 code units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when the page holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        char::decode_utf16(self.units.iter().copied())
            .all(|c| matches!(c, Ok(ch) if ch.is_whitespace()))
    }

    /// Decode, replacing unpaired surrogates with U+FFFD.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }

    /// Decode strictly; `None` if any surrogate is unpaired.
    pub fn to_str_strict(&self) -> Option<String> {
        String::from_utf16(&self.units).ok()
    }
}

impl From<&str> for PageText {
    fn from(s: &str) -> Self {
        Self {
            units: s.encode_utf16().collect(),
        }
    }
}

impl From<String> for PageText {
    fn from(s: String) -> Self {
        PageText::from(s.as_str())
    }
}

impl fmt::Debug for PageText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageText({:?})", self.to_string_lossy())
    }
}

/// Why a text failed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unpaired surrogate U+{unit:04X} at code unit {offset} ({count} in total)")]
pub struct EncodingIssue {
    pub offset: usize,
    pub unit: u16,
    pub count: usize,
}

/// True if the text contains an unpaired surrogate and therefore cannot be
/// encoded as strict UTF-8.
pub fn detect_unsafe(text: &PageText) -> bool {
    char::decode_utf16(text.units.iter().copied()).any(|c| c.is_err())
}

/// Cheap pre-flight check run before every provider call.
pub fn validate(text: &PageText) -> Result<(), EncodingIssue> {
    let mut first: Option<(usize, u16)> = None;
    let mut count = 0;
    let mut offset = 0;
    for decoded in char::decode_utf16(text.units.iter().copied()) {
        match decoded {
            Ok(ch) => offset += ch.len_utf16(),
            Err(e) => {
                if first.is_none() {
                    first = Some((offset, e.unpaired_surrogate()));
                }
                count += 1;
                offset += 1;
            }
        }
    }
    match first {
        None => Ok(()),
        Some((offset, unit)) => Err(EncodingIssue {
            offset,
            unit,
            count,
        }),
    }
}

/// Plain ASCII letter for a styled mathematical letter, if it is one of
/// the bold (U+1D400–1D433) or italic (U+1D434–1D467) Latin letters.
/// U+1D455 is reserved: italic small h lives at U+210E.
pub fn plain_math_letter(c: char) -> Option<char> {
    let cp = c as u32;
    let offset = match cp {
        0x1D400..=0x1D433 => cp - 0x1D400,
        0x1D455 => return None,
        0x1D434..=0x1D467 => cp - 0x1D434,
        _ => return None,
    };
    let letter = if offset < 26 {
        b'A' + offset as u8
    } else {
        b'a' + (offset - 26) as u8
    };
    Some(letter as char)
}

/// Make `text` safe to send as a prompt.
///
/// Returns the repaired text and whether anything changed. Aggressive mode
/// drops unpaired surrogates; conservative mode replaces each with
/// [`PLACEHOLDER`]. Running `normalize` on its own output is a no-op.
pub fn normalize(text: &PageText, aggressive: bool) -> (String, bool) {
    let mut units: Vec<u16> = Vec::with_capacity(text.units.len());
    let mut run = String::new();
    let mut unpaired = 0usize;
    let mut mapped = 0usize;

    for decoded in char::decode_utf16(text.units.iter().copied()) {
        match decoded {
            Ok(ch) => run.push(ch),
            Err(_) => {
                flush_run(&mut run, &mut units, &mut mapped);
                unpaired += 1;
                if !aggressive {
                    units.push(PLACEHOLDER as u16);
                }
            }
        }
    }
    flush_run(&mut run, &mut units, &mut mapped);

    let decoded = String::from_utf16(&units).unwrap_or_else(|_| String::from_utf16_lossy(&units));
    let normalized: String = decoded.nfc().collect();

    let modified = unpaired > 0 || text.units != normalized.encode_utf16().collect::<Vec<_>>();
    if modified {
        debug!(
            unpaired,
            mapped,
            aggressive,
            "normalized page text ({} → {} code units)",
            text.units.len(),
            normalized.encode_utf16().count()
        );
    }
    (normalized, modified)
}

/// Decompose a run of valid characters, fold math letters, append as UTF-16.
fn flush_run(run: &mut String, out: &mut Vec<u16>, mapped: &mut usize) {
    if run.is_empty() {
        return;
    }
    for ch in run.nfd() {
        let ch = match plain_math_letter(ch) {
            Some(plain) => {
                *mapped += 1;
                plain
            }
            None => ch,
        };
        let mut buf = [0u16; 2];
        out.extend_from_slice(ch.encode_utf16(&mut buf));
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_lone_high(prefix: &str, suffix: &str) -> PageText {
        let mut units: Vec<u16> = prefix.encode_utf16().collect();
        units.push(0xD835);
        units.extend(suffix.encode_utf16());
        PageText::from_utf16(units)
    }

    #[test]
    fn clean_text_is_safe() {
        let t = PageText::from("2.1 関連研究 — naïve");
        assert!(!detect_unsafe(&t));
        assert!(validate(&t).is_ok());
    }

    #[test]
    fn lone_surrogate_is_unsafe() {
        let t = with_lone_high("ab", "cd");
        assert!(detect_unsafe(&t));
        let issue = validate(&t).unwrap_err();
        assert_eq!(issue.offset, 2);
        assert_eq!(issue.unit, 0xD835);
        assert_eq!(issue.count, 1);
        assert!(issue.to_string().contains("U+D835"));
    }

    #[test]
    fn conservative_replaces_aggressive_strips() {
        let t = with_lone_high("x", "y");
        let (conservative, changed) = normalize(&t, false);
        assert_eq!(conservative, "x?y");
        assert!(changed);

        let (aggressive, changed) = normalize(&t, true);
        assert_eq!(aggressive, "xy");
        assert!(changed);
    }

    #[test]
    fn math_letters_fold_to_ascii() {
        // 𝐀 (bold A), 𝑧 (italic z)
        let t = with_lone_high("\u{1D400}\u{1D467}", "");
        let (out, changed) = normalize(&t, true);
        assert_eq!(out, "Az");
        assert!(changed);
    }

    #[test]
    fn plain_math_letter_table_bounds() {
        assert_eq!(plain_math_letter('\u{1D400}'), Some('A'));
        assert_eq!(plain_math_letter('\u{1D419}'), Some('Z'));
        assert_eq!(plain_math_letter('\u{1D41A}'), Some('a'));
        assert_eq!(plain_math_letter('\u{1D433}'), Some('z'));
        assert_eq!(plain_math_letter('\u{1D434}'), Some('A'));
        assert_eq!(plain_math_letter('\u{1D454}'), Some('g'));
        assert_eq!(plain_math_letter('\u{1D455}'), None);
        assert_eq!(plain_math_letter('\u{1D456}'), Some('i'));
        assert_eq!(plain_math_letter('\u{1D468}'), None);
        assert_eq!(plain_math_letter('A'), None);
    }

    #[test]
    fn composes_decomposed_text() {
        let t = PageText::from("e\u{0301}");
        let (out, changed) = normalize(&t, false);
        assert_eq!(out, "é");
        assert!(changed);
    }

    #[test]
    fn normalized_text_is_fixed_point() {
        let inputs = [
            with_lone_high("a\u{1D41B}", "e\u{0301}"),
            PageText::from_utf16(vec![0xDC00, 0xD800, 0x41]),
            PageText::from("already fine"),
        ];
        for aggressive in [false, true] {
            for input in &inputs {
                let (once, _) = normalize(input, aggressive);
                let (twice, changed) = normalize(&PageText::from(once.as_str()), aggressive);
                assert_eq!(once, twice);
                assert!(!changed, "second pass changed {once:?}");
            }
        }
    }

    #[test]
    fn aggressive_output_is_always_safe() {
        let t = PageText::from_utf16(vec![0xD835, 0xDC00, 0xDFFF, 0xD835, 0xD835]);
        let (out, _) = normalize(&t, true);
        assert!(!detect_unsafe(&PageText::from(out.as_str())));
        assert_eq!(out, "A");
    }

    #[test]
    fn wtf8_surrogates_are_recovered() {
        // "a" + CESU-8 lone high surrogate D835 + "b"
        let bytes = [b'a', 0xED, 0xA0, 0xB5, b'b'];
        let t = PageText::from_wtf8_lossy(&bytes);
        assert_eq!(t.as_units(), &[0x61, 0xD835, 0x62]);
        assert!(detect_unsafe(&t));
    }

    #[test]
    fn wtf8_surrogate_pair_decodes_to_char() {
        // CESU-8 pair for U+1D400
        let bytes = [0xED, 0xA0, 0xB5, 0xED, 0xB0, 0x80];
        let t = PageText::from_wtf8_lossy(&bytes);
        assert!(!detect_unsafe(&t));
        assert_eq!(t.to_string_lossy(), "\u{1D400}");
    }

    #[test]
    fn blank_detection() {
        assert!(PageText::from("").is_blank());
        assert!(PageText::from(" \n\t").is_blank());
        assert!(!PageText::from(" x ").is_blank());
        assert!(!PageText::from_utf16(vec![0xD800]).is_blank());
    }
}
