//! Property tests for file name sanitizing

use gmail_archiver::storage::sanitize_filename;
use proptest::prelude::*;

const UNSAFE: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '\0'];

proptest! {
    #[test]
    fn sanitized_names_have_no_unsafe_chars(name in "\\PC{0,300}", max in 8usize..256) {
        let out = sanitize_filename(&name, max);
        prop_assert!(!out.contains(UNSAFE));
    }

    #[test]
    fn sanitized_names_respect_max_length(name in "\\PC{0,300}", max in 8usize..256) {
        let out = sanitize_filename(&name, max);
        prop_assert!(out.chars().count() <= max);
    }

    #[test]
    fn sanitized_names_are_never_empty(name in "[ .]{0,20}", max in 8usize..64) {
        let out = sanitize_filename(&name, max);
        prop_assert!(!out.is_empty());
        prop_assert!(!out.starts_with('.'));
        prop_assert!(!out.ends_with(' '));
    }

    #[test]
    fn short_extensions_survive_truncation(stem in "[a-z]{100,200}", ext in "[a-z]{1,4}") {
        let name = format!("{}.{}", stem, ext);
        let out = sanitize_filename(&name, 50);
        let suffix = format!("....{}", ext);
        prop_assert!(out.ends_with(&suffix));
    }
}
