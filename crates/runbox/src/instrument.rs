//! Script instrumentation: turn a snippet into a self-contained program that
//! reports its output, value, error and probes through the result payload.

use std::path::Path;

use crate::error::Error;
use crate::execution::MagicComment;
use crate::language::Language;
use crate::profile::HarnessInput;

/// A program ready to be written to disk and handed to an interpreter.
#[derive(Debug, Clone)]
pub struct InstrumentedScript {
    language: Language,
    source: String,
    probes: Vec<MagicComment>,
}

impl InstrumentedScript {
    /// Instrument `code` for `language`.
    ///
    /// When `auto_log` is set, bare expression lines are wrapped in the
    /// language's output call first. Probes are evaluated after the user
    /// code, in the scope it leaves behind; `packages_dir` is added to the
    /// child's dependency search path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Instrumentation`] if the harness cannot be rendered.
    pub fn build(
        language: Language,
        code: &str,
        probes: &[MagicComment],
        auto_log: bool,
        packages_dir: &Path,
    ) -> Result<Self, Error> {
        let profile = language.profile();
        let code = if auto_log {
            profile.auto_log().transform(code)
        } else {
            code.to_string()
        };

        let source = profile.render_harness(&HarnessInput {
            code: &code,
            probes,
            packages_dir,
        })?;

        tracing::debug!(
            %language,
            code_len = code.len(),
            script_len = source.len(),
            probes = probes.len(),
            "Instrumented snippet"
        );

        Ok(Self {
            language,
            source,
            probes: probes.to_vec(),
        })
    }

    /// Target language.
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    /// Full program text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Probes the program evaluates, in source line order.
    #[must_use]
    pub fn probes(&self) -> &[MagicComment] {
        &self.probes
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn auto_log_runs_before_templating() {
        let script = InstrumentedScript::build(
            Language::JavaScript,
            "const x = 41;\nx + 1",
            &[],
            true,
            Path::new("/pkgs"),
        )
        .expect("build");
        assert!(script.source().contains(r#""const x = 41;\nconsole.log(x + 1);""#));
    }

    #[test]
    fn auto_log_can_be_disabled() {
        let script = InstrumentedScript::build(
            Language::JavaScript,
            "x + 1",
            &[],
            false,
            Path::new("/pkgs"),
        )
        .expect("build");
        assert!(script.source().contains(r#"const __rbCode = "x + 1";"#));
    }

    #[test]
    fn placeholder_text_in_user_code_is_inert() {
        for language in Language::ALL {
            let script = InstrumentedScript::build(
                language,
                "@@CODE@@ @@START@@",
                &[MagicComment::new(1, "@@END@@")],
                false,
                Path::new("/pkgs"),
            )
            .expect("build");
            assert!(script.source().contains("@@CODE@@ @@START@@"), "{language}");
            assert_eq!(script.probes().len(), 1);
            assert_eq!(script.language(), language);
        }
    }

    #[test]
    fn every_harness_frames_its_payload() {
        for language in Language::ALL {
            let script =
                InstrumentedScript::build(language, "", &[], true, Path::new("/pkgs"))
                    .expect("build");
            let sentinels = language.profile().sentinels();
            assert!(script.source().contains(sentinels.start), "{language}");
            assert!(script.source().contains(sentinels.end), "{language}");
        }
    }
}
