//! Target runtime profiles.
//!
//! A profile bundles everything the engine needs to know about one language:
//! the sentinels framing the result payload, how to find the interpreter,
//! how to point it at a per-user package directory, the auto-log rules and
//! the harness template that instruments a snippet.
//!
//! Adding a language means adding a profile; the pipeline does not change.

mod javascript;
mod php;
mod python;
mod ruby;

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use crate::error::Error;
use crate::execution::MagicComment;
use crate::language::Language;
use crate::transform::AutoLog;

pub use javascript::JavaScript;
pub use php::Php;
pub use python::Python;
pub use ruby::Ruby;

/// The pair of tokens framing the result payload on the child's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinels {
    /// Written on its own line before the payload.
    pub start: &'static str,
    /// Written on its own line after the payload.
    pub end: &'static str,
}

/// A version-manager installation layout below the user's home directory.
#[derive(Debug, Clone, Copy)]
pub struct VersionManager {
    /// Directory holding one subdirectory per installed version.
    pub versions_dir: &'static str,
    /// Path of the executable inside a version directory.
    pub executable: &'static str,
}

/// Where to look for an executable, in the order the locator tries.
#[derive(Debug, Clone, Copy)]
pub struct ToolHints {
    /// Command names, most preferred first.
    pub commands: &'static [&'static str],
    /// Version-manager layouts, searched newest version first.
    pub version_managers: &'static [VersionManager],
    /// Fixed install locations on Unix-like systems.
    pub unix_paths: &'static [&'static str],
    /// Fixed install locations on Windows.
    pub windows_paths: &'static [&'static str],
}

/// Everything the harness template needs for one run.
#[derive(Debug, Clone, Copy)]
pub struct HarnessInput<'a> {
    /// User code, already passed through auto-log when enabled.
    pub code: &'a str,
    /// Probes to evaluate after the user code.
    pub probes: &'a [MagicComment],
    /// Per-user package directory for this language.
    pub packages_dir: &'a Path,
}

/// Per-language parameters of the engine.
pub trait RuntimeProfile: Send + Sync + fmt::Debug {
    /// The language this profile targets.
    fn language(&self) -> Language;

    /// Payload framing tokens.
    fn sentinels(&self) -> Sentinels;

    /// Extension of the temporary script file, including the dot.
    fn script_extension(&self) -> &'static str;

    /// Where to find the interpreter.
    fn interpreter(&self) -> ToolHints;

    /// Where to find the package manager.
    fn package_manager(&self) -> ToolHints;

    /// Interpreter flags placed before the script path.
    fn interpreter_args(&self) -> &'static [&'static str] {
        &[]
    }

    /// Environment entries extending the dependency search path.
    fn package_env(&self, packages_dir: &Path) -> Vec<(&'static str, OsString)>;

    /// Line comment markers that may carry a probe.
    fn comment_markers(&self) -> &'static [&'static str];

    /// Whether `$` directly followed by an identifier is a variable sigil.
    fn dollar_is_sigil(&self) -> bool {
        false
    }

    /// Auto-log rewrite for this language.
    fn auto_log(&self) -> &dyn AutoLog;

    /// Stderr fragments showing the interpreter rejected the script itself.
    fn fatal_parse_markers(&self) -> &'static [&'static str];

    /// Produce the instrumented program.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Instrumentation`] if the template cannot be rendered.
    fn render_harness(&self, input: &HarnessInput<'_>) -> Result<String, Error>;
}

/// The profile registered for `language`.
#[must_use]
pub fn for_language(language: Language) -> &'static dyn RuntimeProfile {
    match language {
        Language::JavaScript => &JavaScript,
        Language::Python => &Python,
        Language::Php => &Php,
        Language::Ruby => &Ruby,
    }
}

/// Substitute `@@NAME@@` placeholders in one pass.
///
/// Substituted values are never rescanned, so user code containing
/// placeholder-like text is inserted verbatim.
pub(crate) fn render(template: &str, values: &[(&str, &str)]) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;
    while let Some(open) = rest.find("@@") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("@@")
            .ok_or_else(|| Error::Instrumentation("unterminated template placeholder".into()))?;
        let name = &after[..close];
        let value = values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| Error::Instrumentation(format!("unknown template placeholder `{name}`")))?;
        out.push_str(value);
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// A JSON string literal, which is also a valid JavaScript and Python literal.
pub(crate) fn json_literal(text: &str) -> Result<String, Error> {
    Ok(serde_json::to_string(text)?)
}

/// A single-quoted PHP/Ruby literal: only `\` and `'` need escaping.
pub(crate) fn single_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Prepend `dir` to the path list held in environment variable `var`.
pub(crate) fn prepend_path(var: &str, dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os(var) {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}
