//! Annotation scanning in `/** ... */` comments.
//!
//! Annotations are advisory: malformed tags are ignored, never reported.

use smol_str::SmolStr;

/// Values of `@name` tags in `doc`, in source order.
///
/// A tag is recognized at the start of a line, after any mix of whitespace,
/// `*` and `/`. Its value is the next whitespace-delimited word. With
/// `only_one` the scan stops after the first hit.
pub fn find_in_doc_comment(doc: &str, name: &str, only_one: bool) -> Vec<SmolStr> {
    let mut values = Vec::new();

    for line in doc.lines() {
        let line = line.trim_start_matches(|c: char| c.is_whitespace() || c == '*' || c == '/');
        let line = line.trim_end();
        let line = line.strip_suffix("*/").unwrap_or(line);
        let Some(rest) = line.strip_prefix('@') else {
            continue;
        };
        let Some(rest) = rest.strip_prefix(name) else {
            continue;
        };
        // `@param` must not match `@parameter`
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let Some(word) = rest.split_whitespace().next() else {
            continue;
        };
        values.push(SmolStr::new(word));
        if only_one {
            break;
        }
    }

    values
}

/// Whether `doc` carries a bare `@name` tag anywhere on a line start.
pub fn has_tag(doc: &str, name: &str) -> bool {
    doc.lines().any(|line| {
        let line = line.trim_start_matches(|c: char| c.is_whitespace() || c == '*' || c == '/');
        line.strip_prefix('@')
            .and_then(|rest| rest.strip_prefix(name))
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(|c: char| !c.is_alphanumeric()))
    })
}

/// Deprecation is detected by substring, like the annotation readers of
/// most PHP tooling.
pub fn is_deprecated(doc: &str) -> bool {
    doc.contains("@deprecated")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "/**
     * Frobnicate things.
     *
     * @param int $a first
     * @param Foo|null $b
     * @return string
     * @parameter ignored
     */";

    #[test]
    fn test_params_in_order() {
        assert_eq!(find_in_doc_comment(DOC, "param", false), vec!["int", "Foo|null"]);
    }

    #[test]
    fn test_only_one() {
        assert_eq!(find_in_doc_comment(DOC, "param", true), vec!["int"]);
        assert_eq!(find_in_doc_comment(DOC, "return", true), vec!["string"]);
    }

    #[test]
    fn test_single_line_var() {
        assert_eq!(find_in_doc_comment("/** @var Bar */", "var", true), vec!["Bar"]);
    }

    #[test]
    fn test_tag_without_value() {
        assert!(find_in_doc_comment("/** @return */", "return", true).is_empty());
        assert!(has_tag("/**\n * @superglobal\n */", "superglobal"));
        assert!(!has_tag("/** @superglobals */", "superglobal"));
    }

    #[test]
    fn test_deprecated() {
        assert!(is_deprecated("/** @deprecated use g() */"));
        assert!(!is_deprecated("/** fine */"));
    }
}

#[cfg(all(test, feature = "proptest"))]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn found_values_never_contain_whitespace(doc in "[ */@a-z\\n\\t|$]{0,120}") {
            for value in find_in_doc_comment(&doc, "var", false) {
                prop_assert!(!value.is_empty());
                prop_assert!(!value.contains(char::is_whitespace));
            }
        }

        #[test]
        fn only_one_is_prefix_of_all(doc in "[ */@a-z\\n]{0,120}") {
            let all = find_in_doc_comment(&doc, "param", false);
            let one = find_in_doc_comment(&doc, "param", true);
            prop_assert!(one.len() <= 1);
            prop_assert_eq!(one.first(), all.first());
        }
    }
}
