//! Magic-comment (probe) extraction.
//!
//! A probe is a trailing comment of the form `<marker> $ <expression>`, e.g.
//! `const total = a + b // $ total * 2`. The snippet itself is never modified:
//! the annotations stay in place as ordinary comments so probe line numbers
//! keep matching the source the user sees.

use crate::execution::MagicComment;
use crate::language::Language;

/// Extract the probes of `code` using the comment conventions of `language`.
#[must_use]
pub fn extract(code: &str, language: Language) -> Vec<MagicComment> {
    let profile = language.profile();
    extract_with(code, profile.comment_markers(), profile.dollar_is_sigil())
}

/// Extract probes using an explicit set of line-comment markers.
///
/// When `dollar_is_sigil` is set, a `$` immediately followed by an identifier
/// character is kept as part of the expression (PHP variables), so
/// `// $total` probes `$total` while `// $ count($rows)` probes `count($rows)`.
#[must_use]
pub fn extract_with(code: &str, markers: &[&str], dollar_is_sigil: bool) -> Vec<MagicComment> {
    code.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            probe_expression(line, markers, dollar_is_sigil)
                .map(|expression| MagicComment::new(idx + 1, expression))
        })
        .collect()
}

fn probe_expression(line: &str, markers: &[&str], dollar_is_sigil: bool) -> Option<String> {
    let mut from = 0;
    while let Some((at, marker)) = next_marker(line, from, markers) {
        let after = &line[at + marker.len()..];
        if let Some(rest) = after.trim_start().strip_prefix('$') {
            let sigil = dollar_is_sigil
                && rest
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphabetic() || c == '_');
            let expression = if sigil {
                format!("${}", rest.trim_end())
            } else {
                rest.trim().to_string()
            };
            if !expression.is_empty() {
                return Some(expression);
            }
        }
        from = at + marker.len();
    }
    None
}

/// Earliest occurrence of any marker at or after byte offset `from`.
fn next_marker<'m>(line: &str, from: usize, markers: &[&'m str]) -> Option<(usize, &'m str)> {
    markers
        .iter()
        .filter_map(|marker| line[from..].find(marker).map(|pos| (from + pos, *marker)))
        .min_by_key(|(pos, _)| *pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_trailing_probe_with_line_number() {
        let code = "const x = 41;\nconst y = x + 1; // $ y * 2\n";
        let probes = extract(code, Language::JavaScript);
        assert_eq!(probes, vec![MagicComment::new(2, "y * 2")]);
    }

    #[test]
    fn whitespace_between_marker_and_dollar_is_optional() {
        let probes = extract("x = 1 #$x\ny = 2 #   $  y  ", Language::Python);
        assert_eq!(
            probes,
            vec![MagicComment::new(1, "x"), MagicComment::new(2, "y")]
        );
    }

    #[test]
    fn ignores_plain_comments_and_empty_probes() {
        let code = "// just a note\nlet a = 1; // $\nlet b = 2; // cost in $ is fine";
        assert!(extract(code, Language::JavaScript).is_empty());
    }

    #[test]
    fn keeps_searching_past_non_probe_markers() {
        let probes = extract("foo() // todo // $ foo.count", Language::JavaScript);
        assert_eq!(probes, vec![MagicComment::new(1, "foo.count")]);
    }

    #[test]
    fn php_dollar_sigil_stays_with_variable() {
        let code = "<?php\n$total = 3; // $total\n$rows = [1, 2]; # $ count($rows)";
        let probes = extract(code, Language::Php);
        assert_eq!(
            probes,
            vec![
                MagicComment::new(2, "$total"),
                MagicComment::new(3, "count($rows)"),
            ]
        );
    }

    #[test]
    fn probes_come_back_in_line_order() {
        let code = "a = 1 # $ a\n\nb = 2 # $ b\nc = 3 # $ c";
        let lines: Vec<usize> = extract(code, Language::Ruby)
            .into_iter()
            .map(|p| p.line)
            .collect();
        assert_eq!(lines, vec![1, 3, 4]);
    }

    #[test]
    fn non_ascii_text_before_marker() {
        let probes = extract("const s = 'héllo' // $ s.length", Language::JavaScript);
        assert_eq!(probes, vec![MagicComment::new(1, "s.length")]);
    }
}
