//! Property-based tests for Unicode repair.
//!
//! Inputs are raw UTF-16 code units drawn from ASCII, Latin-1 letters,
//! combining marks, kana, styled math letters (as surrogate pairs) and the
//! whole surrogate range, so lone and reversed surrogates are common.

use proptest::prelude::*;

use crate::unicode::{detect_unsafe, normalize, validate, PageText};

fn well_formed_unit_strategy() -> impl Strategy<Value = Vec<u16>> {
    prop_oneof![
        (0x20u16..0x7F).prop_map(|u| vec![u]),
        (0xC0u16..0x180).prop_map(|u| vec![u]),
        (0x300u16..0x370).prop_map(|u| vec![u]),
        (0x3040u16..0x3100).prop_map(|u| vec![u]),
        // U+1D400..U+1D4FF as a well-formed pair
        (0xDC00u16..0xDD00).prop_map(|low| vec![0xD835, low]),
    ]
}

fn unit_strategy() -> impl Strategy<Value = Vec<u16>> {
    prop_oneof![
        4 => well_formed_unit_strategy(),
        1 => (0xD800u16..0xE000).prop_map(|u| vec![u]),
    ]
}

fn page_strategy() -> impl Strategy<Value = PageText> {
    prop::collection::vec(unit_strategy(), 0..48)
        .prop_map(|chunks| PageText::from_utf16(chunks.concat()))
}

fn well_formed_page_strategy() -> impl Strategy<Value = PageText> {
    prop::collection::vec(well_formed_unit_strategy(), 0..48)
        .prop_map(|chunks| PageText::from_utf16(chunks.concat()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn normalize_is_idempotent(text in page_strategy(), aggressive in any::<bool>()) {
        let (once, _) = normalize(&text, aggressive);
        let (twice, changed) = normalize(&PageText::from(once.as_str()), aggressive);
        prop_assert_eq!(&once, &twice);
        prop_assert!(!changed, "second pass changed {:?}", once);
    }

    #[test]
    fn repaired_text_is_always_safe(text in page_strategy(), aggressive in any::<bool>()) {
        let (out, _) = normalize(&text, aggressive);
        let repaired = PageText::from(out.as_str());
        prop_assert!(!detect_unsafe(&repaired));
        prop_assert!(validate(&repaired).is_ok());
    }

    #[test]
    fn unsafe_input_is_reported_as_modified(text in page_strategy(), aggressive in any::<bool>()) {
        let (_, changed) = normalize(&text, aggressive);
        if detect_unsafe(&text) {
            prop_assert!(changed);
        }
    }

    #[test]
    fn modes_agree_without_lone_surrogates(text in well_formed_page_strategy()) {
        prop_assert!(!detect_unsafe(&text));
        prop_assert_eq!(normalize(&text, false), normalize(&text, true));
    }
}
