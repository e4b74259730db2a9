//! Header line codec between `Headers` and the engine's line protocol.
//!
//! Outbound, the engine takes one `Name:Value` line per header. Inbound, it
//! hands the header callback every raw line it receives, including the status
//! line and the blank line closing the block.

use crate::http::Headers;

const EXPECT: &str = "Expect";

/// Flatten a header mapping into engine header lines.
///
/// Each distinct name produces exactly one line built from `Headers::get`, so
/// repeated values are not preserved. An empty `Expect:` line is appended when
/// the request carries no `Expect` value, which stops the engine from sending
/// `Expect: 100-continue` on uploads.
pub fn flatten(headers: &Headers) -> Vec<String> {
    let mut lines: Vec<String> = headers
        .names()
        .map(|name| format!("{name}:{}", headers.get(name).unwrap_or_default()))
        .collect();
    if !headers.contains(EXPECT) {
        lines.push(format!("{EXPECT}:"));
    }
    lines
}

/// Split a raw header line into name and value.
///
/// Lines without a colon yield `None`. Spaces, tabs and line endings are
/// stripped from the whole value, not only its ends.
pub fn parse_line(raw: &[u8]) -> Option<(String, String)> {
    let line = String::from_utf8_lossy(raw);
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect();
    Some((name.to_string(), value))
}

/// Whether `name` survives the line protocol: non-empty visible ASCII with no
/// colon.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn flatten_injects_empty_expect() {
        let mut headers = Headers::new();
        headers.append("Accept", "*/*");
        assert_eq!(flatten(&headers), vec!["Accept:*/*", "Expect:"]);
    }

    #[test]
    fn flatten_keeps_caller_expect() {
        let mut headers = Headers::new();
        headers.append("expect", "100-continue");
        assert_eq!(flatten(&headers), vec!["expect:100-continue"]);
    }

    #[test]
    fn flatten_collapses_repeated_names() {
        let mut headers = Headers::new();
        headers.append("X-Tag", "first");
        headers.append("x-tag", "second");
        assert_eq!(flatten(&headers), vec!["X-Tag:first", "Expect:"]);
    }

    #[test]
    fn empty_mapping_still_suppresses_expect() {
        assert_eq!(flatten(&Headers::new()), vec!["Expect:"]);
    }

    #[test]
    fn parse_strips_whitespace_and_line_endings() {
        assert_eq!(
            parse_line(b"X: 1\r\n"),
            Some(("X".to_string(), "1".to_string()))
        );
        assert_eq!(
            parse_line(b"Content-Type: text/plain; charset=utf-8\r\n"),
            Some(("Content-Type".to_string(), "text/plain;charset=utf-8".to_string()))
        );
    }

    #[test]
    fn parse_ignores_lines_without_colon() {
        assert_eq!(parse_line(b"HTTP/3 200\r\n"), None);
        assert_eq!(parse_line(b"\r\n"), None);
        assert_eq!(parse_line(b""), None);
    }

    #[test]
    fn parse_splits_on_first_colon_only() {
        assert_eq!(
            parse_line(b"Location: https://example.test:8443/x\r\n"),
            Some(("Location".to_string(), "https://example.test:8443/x".to_string()))
        );
    }

    #[test]
    fn header_names_are_validated() {
        assert!(is_valid_name("X-Request-Id"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Bad Name"));
        assert!(!is_valid_name("a:b"));
    }

    proptest! {
        #[test]
        fn flatten_emits_one_line_per_distinct_name(
            names in proptest::collection::vec("[A-Za-z][A-Za-z0-9-]{0,12}", 0..12),
        ) {
            let mut headers = Headers::new();
            for (i, name) in names.iter().enumerate() {
                if !name.eq_ignore_ascii_case("expect") {
                    headers.append(name.clone(), format!("v{i}"));
                }
            }
            let distinct = headers.names().count();
            let lines = flatten(&headers);
            prop_assert_eq!(lines.len(), distinct + 1);
            prop_assert_eq!(lines.last().map(String::as_str), Some("Expect:"));

            let mut seen: Vec<String> = Vec::new();
            for line in &lines {
                let (name, _) = line.split_once(':').unwrap();
                let lower = name.to_ascii_lowercase();
                prop_assert!(!seen.contains(&lower), "duplicated {}", name);
                seen.push(lower);
            }
        }

        #[test]
        fn parse_never_keeps_whitespace(name in "[A-Za-z-]{1,10}", value in "[ -~\t]{0,24}") {
            let raw = format!("{name}:{value}\r\n");
            let (parsed_name, parsed_value) = parse_line(raw.as_bytes()).unwrap();
            prop_assert_eq!(parsed_name, name);
            prop_assert!(!parsed_value.contains([' ', '\t', '\r', '\n']));
        }
    }
}
