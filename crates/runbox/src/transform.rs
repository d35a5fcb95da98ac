//! Auto-log transform: wrap bare expression statements in an output call.
//!
//! This is a line-oriented heuristic, not a parser. A single forward pass
//! tracks brace and parenthesis depth by naive character counting and only
//! rewrites lines that sit at depth zero, are not comments, do not start a
//! declaration or control-flow statement, contain no assignment, and look
//! like a bare expression. Everything else passes through untouched.
//!
//! Known limitation: an expression split across several lines is judged one
//! line at a time and may be misclassified.

use std::fmt;

use regex::Regex;

/// A per-language rewrite that makes bare expressions visible.
///
/// Profiles hand out an implementation of this trait, so a language can move
/// from the line heuristic to a real lexer without touching the pipeline.
pub trait AutoLog: Send + Sync + fmt::Debug {
    /// Rewrite `code`, returning it unchanged where nothing applies.
    fn transform(&self, code: &str) -> String;
}

/// Builds the output call for an expression. The flag is `true` when the
/// expression is a bare simple identifier.
pub type WrapFn = fn(expression: &str, simple_identifier: bool) -> String;

/// Data describing one language for [`LineAutoLog`].
#[derive(Debug, Clone)]
pub struct AutoLogRules {
    /// Line comment markers (`//`, `#`).
    pub line_comments: &'static [&'static str],
    /// Block comment delimiters, if the language has them.
    pub block_comment: Option<(&'static str, &'static str)>,
    /// Delimiters of strings that may span lines (`"""`, backtick). The same
    /// token opens and closes.
    pub block_strings: &'static [&'static str],
    /// Statement-leading keywords that disqualify a line.
    pub keywords: &'static [&'static str],
    /// Operators containing `=` that are not assignments. Longest first.
    pub non_assignment_operators: &'static [&'static str],
    /// Line endings that open a block.
    pub block_openers: &'static [&'static str],
    /// Prefixes of lines that already are output calls.
    pub output_calls: &'static [&'static str],
    /// Only rewrite lines without leading indentation.
    pub top_level_only: bool,
    /// Full-match pattern for a bare expression.
    pub expression: &'static str,
    /// Full-match pattern for a bare simple identifier.
    pub simple_identifier: &'static str,
    /// Output call builder.
    pub wrap: WrapFn,
    /// Appended after the output call.
    pub terminator: &'static str,
}

/// The line/depth-counter heuristic, driven by [`AutoLogRules`].
pub struct LineAutoLog {
    rules: AutoLogRules,
    expression: Option<Regex>,
    simple_identifier: Option<Regex>,
}

impl fmt::Debug for LineAutoLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineAutoLog")
            .field("keywords", &self.rules.keywords.len())
            .field("top_level_only", &self.rules.top_level_only)
            .field("enabled", &self.expression.is_some())
            .finish_non_exhaustive()
    }
}

impl LineAutoLog {
    /// Compile the patterns in `rules`.
    ///
    /// A pattern that fails to compile disables the rewrite instead of
    /// failing: the transform is an optional convenience.
    #[must_use]
    pub fn new(rules: AutoLogRules) -> Self {
        let expression = compile(rules.expression);
        let simple_identifier = compile(rules.simple_identifier);
        Self {
            rules,
            expression,
            simple_identifier,
        }
    }

    /// Decide what to do with one line (without its line terminator).
    fn rewrite_line(&self, line: &str, state: &mut ScanState) -> Option<String> {
        let trimmed = line.trim();
        let at_top = state.braces <= 0 && state.parens <= 0;
        let in_block_comment = state.in_block_comment;

        if state.open_string.is_some() {
            self.track_block_strings(line, state);
            return None;
        }
        if in_block_comment {
            self.track_block_comment(trimmed, state);
            return None;
        }
        if let Some((open, _)) = self.rules.block_comment
            && trimmed.starts_with(open)
        {
            self.track_block_comment(trimmed, state);
            return None;
        }

        state.count_depth(line);

        if self.rules.line_comments.iter().any(|c| trimmed.starts_with(c)) {
            return None;
        }
        self.track_block_strings(line, state);
        if trimmed.is_empty() || !at_top || state.open_string.is_some() {
            return None;
        }
        if trimmed.starts_with('{') || trimmed.starts_with('}') {
            return None;
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        if self.rules.top_level_only && !indent.is_empty() {
            return None;
        }

        let (code, comment) = self.split_comment(trimmed);
        if code.is_empty() || self.rules.block_openers.iter().any(|o| code.ends_with(o)) {
            return None;
        }
        if self.rules.keywords.contains(&leading_word(code)) {
            return None;
        }
        if self.rules.output_calls.iter().any(|p| code.starts_with(p)) {
            return None;
        }
        if self.is_assignment(code) {
            return None;
        }

        let expression = code.strip_suffix(';').unwrap_or(code).trim_end();
        let pattern = self.expression.as_ref()?;
        if expression.is_empty() || !pattern.is_match(expression) {
            return None;
        }
        let simple = self
            .simple_identifier
            .as_ref()
            .is_some_and(|re| re.is_match(expression));

        let mut rewritten = format!(
            "{indent}{}{}",
            (self.rules.wrap)(expression, simple),
            self.rules.terminator
        );
        if let Some(comment) = comment {
            rewritten.push(' ');
            rewritten.push_str(comment);
        }
        Some(rewritten)
    }

    fn track_block_comment(&self, trimmed: &str, state: &mut ScanState) {
        let Some((open, close)) = self.rules.block_comment else {
            return;
        };
        let mut rest = trimmed;
        loop {
            if state.in_block_comment {
                match rest.find(close) {
                    Some(pos) => {
                        state.in_block_comment = false;
                        rest = &rest[pos + close.len()..];
                    }
                    None => return,
                }
            } else {
                match rest.find(open) {
                    Some(pos) => {
                        state.in_block_comment = true;
                        rest = &rest[pos + open.len()..];
                    }
                    None => return,
                }
            }
        }
    }

    /// Follow multi-line string delimiters through `line`, leaving
    /// `state.open_string` set when the line ends inside one.
    fn track_block_strings(&self, line: &str, state: &mut ScanState) {
        let mut rest = line;
        loop {
            if let Some(delimiter) = state.open_string {
                let Some(pos) = rest.find(delimiter) else {
                    return;
                };
                state.open_string = None;
                rest = &rest[pos + delimiter.len()..];
            } else {
                let Some((pos, delimiter)) = self
                    .rules
                    .block_strings
                    .iter()
                    .filter_map(|&d| rest.find(d).map(|pos| (pos, d)))
                    .min_by_key(|(pos, _)| *pos)
                else {
                    return;
                };
                state.open_string = Some(delimiter);
                rest = &rest[pos + delimiter.len()..];
            }
        }
    }

    /// Split off a trailing line comment: `(code, Some(comment))`.
    fn split_comment<'a>(&self, trimmed: &'a str) -> (&'a str, Option<&'a str>) {
        let first = self
            .rules
            .line_comments
            .iter()
            .filter_map(|marker| trimmed.find(marker))
            .min();
        match first {
            Some(pos) => (trimmed[..pos].trim_end(), Some(&trimmed[pos..])),
            None => (trimmed, None),
        }
    }

    fn is_assignment(&self, code: &str) -> bool {
        let mut stripped = code.to_string();
        for op in self.rules.non_assignment_operators {
            stripped = stripped.replace(op, " ");
        }
        stripped.contains('=')
    }
}

impl AutoLog for LineAutoLog {
    fn transform(&self, code: &str) -> String {
        let mut state = ScanState::default();
        let lines: Vec<String> = code
            .split('\n')
            .map(|raw| {
                let (line, cr) = match raw.strip_suffix('\r') {
                    Some(line) => (line, "\r"),
                    None => (raw, ""),
                };
                match self.rewrite_line(line, &mut state) {
                    Some(rewritten) => format!("{rewritten}{cr}"),
                    None => raw.to_string(),
                }
            })
            .collect();
        lines.join("\n")
    }
}

#[derive(Debug, Default)]
struct ScanState {
    braces: i64,
    parens: i64,
    in_block_comment: bool,
    open_string: Option<&'static str>,
}

impl ScanState {
    fn count_depth(&mut self, line: &str) {
        for c in line.chars() {
            match c {
                '{' => self.braces += 1,
                '}' => self.braces -= 1,
                '(' => self.parens += 1,
                ')' => self.parens -= 1,
                _ => {}
            }
        }
    }
}

/// The identifier-like word a line starts with.
fn leading_word(code: &str) -> &str {
    let end = code
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(code.len(), |(i, _)| i);
    &code[..end]
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(error = %e, pattern, "auto-log pattern failed to compile");
            None
        }
    }
}
