//! Supported target languages.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::profile::{self, RuntimeProfile};

/// A scripting language the engine knows how to instrument and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// JavaScript, run with Node.js.
    #[serde(alias = "js", alias = "node")]
    JavaScript,
    /// Python 3.
    #[serde(alias = "py")]
    Python,
    /// PHP (CLI SAPI).
    Php,
    /// Ruby (MRI).
    #[serde(alias = "rb")]
    Ruby,
}

impl Language {
    /// Every supported language, in a stable order.
    pub const ALL: [Self; 4] = [Self::JavaScript, Self::Python, Self::Php, Self::Ruby];

    /// Lowercase identifier used in file names, JSON and directory layouts.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Php => "php",
            Self::Ruby => "ruby",
        }
    }

    /// The runtime profile describing how to instrument and run this language.
    #[must_use]
    pub fn profile(self) -> &'static dyn RuntimeProfile {
        profile::for_language(self)
    }

    /// Guess the language from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "js" | "cjs" | "mjs" => Some(Self::JavaScript),
            "py" => Some(Self::Python),
            "php" => Some(Self::Php),
            "rb" => Some(Self::Ruby),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown language name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language `{0}` (expected one of: javascript, python, php, ruby)")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(Self::JavaScript),
            "python" | "py" => Ok(Self::Python),
            "php" => Ok(Self::Php),
            "ruby" | "rb" => Ok(Self::Ruby),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("JS".parse::<Language>(), Ok(Language::JavaScript));
        assert_eq!("node".parse::<Language>(), Ok(Language::JavaScript));
        assert_eq!(" python ".parse::<Language>(), Ok(Language::Python));
        assert_eq!("rb".parse::<Language>(), Ok(Language::Ruby));
        assert_eq!("php".parse::<Language>(), Ok(Language::Php));
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for language in Language::ALL {
            assert_eq!(language.to_string().parse::<Language>(), Ok(language));
        }
    }

    #[test]
    fn infers_from_extension() {
        assert_eq!(
            Language::from_path(Path::new("scratch.MJS")),
            Some(Language::JavaScript)
        );
        assert_eq!(Language::from_path(Path::new("a/b.rb")), Some(Language::Ruby));
        assert_eq!(Language::from_path(Path::new("notes.txt")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Language::JavaScript).expect("serialize");
        assert_eq!(json, "\"javascript\"");
        let parsed: Language = serde_json::from_str("\"py\"").expect("deserialize alias");
        assert_eq!(parsed, Language::Python);
    }
}
