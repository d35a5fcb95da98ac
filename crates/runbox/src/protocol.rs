//! Result protocol parser.
//!
//! The child writes its payload framed by two sentinel lines:
//!
//! ```text
//! <START>\n
//! {"output":[...],"error":null,"probes":[...]}
//! \n<END>\n
//! ```
//!
//! The channel is untrusted: output may be truncated, interleaved with
//! runtime warnings or cut off by a crash. [`parse`] never fails; it walks a
//! ladder of recovery steps and always produces an [`ExecutionResult`].

use serde_json::Value;

use crate::execution::{ExecutionError, ExecutionResult, LogEntry};
use crate::profile::Sentinels;

/// Keys identifying a JSON object as a result payload.
const PAYLOAD_KEYS: [&str; 4] = ["output", "error", "probes", "value"];

/// Message used when the child produced nothing at all.
pub const NO_OUTPUT: &str = "No output produced";

/// Which ladder step produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Well-formed sentinel-framed payload.
    Sentinel,
    /// No payload; stderr became the error.
    Stderr,
    /// A payload-shaped JSON object found without valid framing.
    EmbeddedPayload,
    /// Raw stdout became a single output entry.
    RawOutput,
    /// Nothing usable at all.
    Empty,
}

/// Recover an [`ExecutionResult`] from a child's accumulated streams.
#[must_use]
pub fn parse(stdout: &str, stderr: &str, sentinels: Sentinels) -> (ExecutionResult, Recovery) {
    if let Some(result) = framed_payload(stdout, sentinels) {
        return (result, Recovery::Sentinel);
    }

    let stderr = stderr.trim();
    if !stderr.is_empty() && !stdout.contains(sentinels.start) {
        tracing::debug!("No payload on stdout, using stderr as the error");
        return (
            ExecutionResult::from_error(ExecutionError::new(stderr)),
            Recovery::Stderr,
        );
    }

    if stdout.contains(sentinels.start)
        && let Some(result) = embedded_payload(stdout)
    {
        tracing::warn!("Result framing was damaged, recovered an embedded payload");
        return (result, Recovery::EmbeddedPayload);
    }

    let text = stdout.trim_end_matches(['\r', '\n']);
    if !text.trim().is_empty() {
        tracing::warn!(stdout_len = stdout.len(), "No parseable payload, returning raw output");
        let result = ExecutionResult {
            output: vec![LogEntry::log(text)],
            error: (!stderr.is_empty()).then(|| ExecutionError::new(stderr)),
            ..ExecutionResult::default()
        };
        return (result, Recovery::RawOutput);
    }

    (
        ExecutionResult::from_error(ExecutionError::new(NO_OUTPUT)),
        Recovery::Empty,
    )
}

/// Step 1: a start sentinel on its own line, then the nearest end sentinel
/// starting a line after it.
fn framed_payload(stdout: &str, sentinels: Sentinels) -> Option<ExecutionResult> {
    let mut search_from = 0;
    while let Some(offset) = stdout[search_from..].find(sentinels.start) {
        let after_start = search_from + offset + sentinels.start.len();
        search_from = after_start;

        let rest = &stdout[after_start..];
        let body_offset = if rest.starts_with("\r\n") {
            2
        } else if rest.starts_with('\n') {
            1
        } else {
            continue;
        };
        let body = &rest[body_offset..];

        let Some(end) = find_line_start(body, sentinels.end) else {
            continue;
        };
        match serde_json::from_str::<ExecutionResult>(body[..end].trim()) {
            Ok(result) => return Some(result),
            Err(e) => tracing::debug!(error = %e, "Framed payload did not parse"),
        }
    }
    None
}

/// Position of `needle` where it begins a line (preceded by `\n`).
fn find_line_start(haystack: &str, needle: &str) -> Option<usize> {
    if haystack.starts_with(needle) {
        return Some(0);
    }
    let pattern = format!("\n{needle}");
    haystack.find(&pattern).map(|pos| pos + 1)
}

/// Step 3: the first balanced, payload-shaped JSON object anywhere.
fn embedded_payload(stdout: &str) -> Option<ExecutionResult> {
    balanced_groups(stdout.as_bytes())
        .into_iter()
        .find_map(|(open, close)| {
            let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&stdout[open..close])
            else {
                return None;
            };
            if !PAYLOAD_KEYS.iter().any(|key| map.contains_key(*key)) {
                return None;
            }
            serde_json::from_value::<ExecutionResult>(Value::Object(map)).ok()
        })
}

/// Outermost balanced `{...}` groups as `(open, close)` byte ranges, in order.
///
/// One pass with a stack of open positions. Quotes are only tracked inside a
/// group, so braces inside JSON strings do not count. Groups are disjoint, so
/// parsing every candidate stays linear in the input.
fn balanced_groups(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut opens = Vec::new();
    let mut groups: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if !opens.is_empty() => in_string = true,
            b'{' => opens.push(i),
            b'}' => {
                let Some(open) = opens.pop() else {
                    continue;
                };
                while groups.last().is_some_and(|&(inner, _)| inner > open) {
                    groups.pop();
                }
                groups.push((open, i + 1));
            }
            _ => {}
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::LogKind;

    const SENTINELS: Sentinels = Sentinels {
        start: "<<T>>_START",
        end: "<<T>>_END",
    };

    fn framed(body: &str) -> String {
        format!("{}\n{body}\n{}\n", SENTINELS.start, SENTINELS.end)
    }

    #[test]
    fn parses_framed_payload() {
        let stdout = framed(
            r#"{"output":[{"kind":"log","text":"42"}],"error":null,"probes":[{"line":1,"expression":"x","value":41}]}"#,
        );
        let (result, step) = parse(&stdout, "", SENTINELS);
        assert_eq!(step, Recovery::Sentinel);
        assert_eq!(result.output, vec![LogEntry::log("42")]);
        assert_eq!(result.probes[0].value, Some(serde_json::json!(41)));
        assert!(result.value.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn keeps_present_null_value() {
        let (result, _) = parse(&framed(r#"{"output":[],"value":null}"#), "", SENTINELS);
        assert_eq!(result.value, Some(Value::Null));
    }

    #[test]
    fn ignores_noise_around_the_frame_and_stderr_warnings() {
        let stdout = format!(
            "user wrote {}\nbefore\n{}trailing garbage",
            SENTINELS.start,
            framed(r#"{"output":[{"kind":"warn","text":"w"}]}"#)
        );
        let (result, step) = parse(&stdout, "DeprecationWarning: x", SENTINELS);
        assert_eq!(step, Recovery::Sentinel);
        assert_eq!(result.output[0].kind, LogKind::Warn);
        assert!(result.error.is_none());
    }

    #[test]
    fn accepts_crlf_framing() {
        let stdout = format!(
            "{}\r\n{{\"output\":[]}}\r\n{}\r\n",
            SENTINELS.start, SENTINELS.end
        );
        let (result, step) = parse(&stdout, "", SENTINELS);
        assert_eq!(step, Recovery::Sentinel);
        assert!(result.is_success());
    }

    #[test]
    fn stderr_becomes_error_without_sentinels() {
        let (result, step) = parse("", "  Segmentation fault\n", SENTINELS);
        assert_eq!(step, Recovery::Stderr);
        assert!(result.output.is_empty());
        assert_eq!(
            result.error.map(|e| e.message),
            Some("Segmentation fault".to_string())
        );
    }

    #[test]
    fn recovers_payload_when_end_sentinel_is_missing() {
        let stdout = format!(
            "{}\n{{\"output\":[{{\"kind\":\"log\",\"text\":\"}} {{\"}}],\"error\":{{\"message\":\"boom\"}}}}",
            SENTINELS.start
        );
        let (result, step) = parse(&stdout, "killed", SENTINELS);
        assert_eq!(step, Recovery::EmbeddedPayload);
        assert_eq!(result.output[0].text, "} {");
        assert_eq!(result.error.map(|e| e.message), Some("boom".to_string()));
    }

    #[test]
    fn skips_objects_that_are_not_payloads() {
        let stdout = format!("{}\n{{\"name\":\"x\"}} {{\"probes\":[]}}", SENTINELS.start);
        let (result, step) = parse(&stdout, "", SENTINELS);
        assert_eq!(step, Recovery::EmbeddedPayload);
        assert!(result.probes.is_empty());
        assert!(result.is_success());
    }

    #[test]
    fn user_json_without_sentinels_stays_output() {
        let stdout = "{\"value\": 7, \"error\": null}\n";
        let (result, step) = parse(stdout, "", SENTINELS);
        assert_eq!(step, Recovery::RawOutput);
        assert_eq!(
            result.output,
            vec![LogEntry::log("{\"value\": 7, \"error\": null}")]
        );
        assert!(result.value.is_none());
    }

    #[test]
    fn prefers_the_outer_object_over_nested_ones() {
        let stdout = format!(
            "{}\n{{\"output\":[],\"probes\":[{{\"line\":1,\"expression\":\"x\",\"value\":1}}]",
            SENTINELS.start
        );
        let unframed = format!("{stdout}}}");
        let (result, step) = parse(&unframed, "", SENTINELS);
        assert_eq!(step, Recovery::EmbeddedPayload);
        assert_eq!(result.probes.len(), 1);
        assert!(result.value.is_none());
    }

    #[test]
    fn large_unbalanced_input_is_scanned_once() {
        let stdout = format!("{}\n{}", SENTINELS.start, "{".repeat(200_000));
        let (result, step) = parse(&stdout, "", SENTINELS);
        assert_eq!(step, Recovery::RawOutput);
        assert_eq!(result.output.len(), 1);

        let nested = format!(
            "{}\n{}{}",
            SENTINELS.start,
            "{\"a\":".repeat(50_000),
            "}".repeat(50_000)
        );
        let (_, step) = parse(&nested, "", SENTINELS);
        assert_eq!(step, Recovery::RawOutput);
    }

    #[test]
    fn raw_stdout_becomes_one_entry() {
        let (result, step) = parse("hello\nworld\n", "", SENTINELS);
        assert_eq!(step, Recovery::RawOutput);
        assert_eq!(result.output, vec![LogEntry::log("hello\nworld")]);
        assert!(result.error.is_none());
    }

    #[test]
    fn raw_output_keeps_stderr_as_error() {
        let stdout = format!("partial {}", SENTINELS.start);
        let (result, step) = parse(&stdout, "Killed", SENTINELS);
        assert_eq!(step, Recovery::RawOutput);
        assert_eq!(result.output.len(), 1);
        assert_eq!(result.error.map(|e| e.message), Some("Killed".to_string()));
    }

    #[test]
    fn empty_streams_report_no_output() {
        let (result, step) = parse("", "", SENTINELS);
        assert_eq!(step, Recovery::Empty);
        assert_eq!(result.error.map(|e| e.message), Some(NO_OUTPUT.to_string()));
        let (_, step) = parse(" \n\r\n", "   ", SENTINELS);
        assert_eq!(step, Recovery::Empty);
    }

    #[test]
    fn never_panics_on_hostile_input() {
        let inputs = [
            String::new(),
            "{".repeat(64),
            "}".repeat(64),
            "<<T>>_STA".to_string(),
            SENTINELS.start.to_string(),
            format!("{}\n", SENTINELS.start),
            format!("{}\n{{\"output\":", SENTINELS.start),
            format!("{}\n\n{}\n", SENTINELS.start, SENTINELS.end),
            format!("{}\nnot json\n{}\n", SENTINELS.start, SENTINELS.end),
            format!("{}garbage\u{0}\u{fffd}", framed(r#"{"output":[]}"#)),
            "\"unterminated {\"output\":[]}".to_string(),
            "é{\"probes\":[{\"line\":\"x\"}]}ü".to_string(),
        ];
        for input in &inputs {
            for stderr in ["", "err"] {
                let (result, step) = parse(input, stderr, SENTINELS);
                if step != Recovery::Sentinel && step != Recovery::EmbeddedPayload {
                    assert!(result.error.is_some() || !result.output.is_empty(), "{input:?}");
                }
            }
        }
    }
}
