//! Interpreter and package-manager discovery.
//!
//! Lookup never fails: when nothing better is found the bare command name is
//! returned and any failure surfaces when the process is spawned.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use dashmap::DashMap;

use crate::language::Language;
use crate::profile::{ToolHints, VersionManager};

/// Which step of the lookup produced a [`Located`] path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatedBy {
    /// Configured explicitly.
    Override,
    /// Found under a version manager's install directory.
    VersionManager,
    /// Reported by `which` (or `where` on Windows).
    PathLookup,
    /// A well-known install location.
    WellKnown,
    /// Nothing found; the bare command name is used.
    Bare,
}

impl fmt::Display for LocatedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Override => "override",
            Self::VersionManager => "version manager",
            Self::PathLookup => "PATH lookup",
            Self::WellKnown => "well-known location",
            Self::Bare => "bare command",
        })
    }
}

/// A resolved executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Path or bare command name to spawn.
    pub path: PathBuf,
    /// How it was found.
    pub by: LocatedBy,
}

/// Finds interpreters and package managers, caching results per language.
#[derive(Default)]
pub struct RuntimeLocator {
    overrides: HashMap<Language, PathBuf>,
    home: Option<PathBuf>,
    interpreters: DashMap<Language, Located>,
    package_managers: DashMap<Language, Located>,
}

impl fmt::Debug for RuntimeLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeLocator")
            .field("overrides", &self.overrides)
            .field("home", &self.home)
            .field("cached_interpreters", &self.interpreters.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeLocator {
    /// A locator searching below the current user's home directory.
    #[must_use]
    pub fn new(overrides: HashMap<Language, PathBuf>) -> Self {
        Self::with_home(overrides, dirs::home_dir())
    }

    /// A locator with an explicit home directory (or none).
    #[must_use]
    pub fn with_home(overrides: HashMap<Language, PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            overrides,
            home,
            interpreters: DashMap::new(),
            package_managers: DashMap::new(),
        }
    }

    /// Resolve the interpreter for `language`.
    pub async fn locate_interpreter(&self, language: Language) -> Located {
        if let Some(path) = self.overrides.get(&language) {
            return Located {
                path: path.clone(),
                by: LocatedBy::Override,
            };
        }
        if let Some(cached) = self.interpreters.get(&language) {
            return cached.clone();
        }
        let located = resolve(language.profile().interpreter(), self.home.as_deref()).await;
        tracing::debug!(
            %language,
            path = %located.path.display(),
            by = %located.by,
            "Resolved interpreter"
        );
        self.interpreters.insert(language, located.clone());
        located
    }

    /// Resolve the package manager for `language`.
    pub async fn locate_package_manager(&self, language: Language) -> Located {
        if let Some(cached) = self.package_managers.get(&language) {
            return cached.clone();
        }
        let located = resolve(language.profile().package_manager(), self.home.as_deref()).await;
        tracing::debug!(
            %language,
            path = %located.path.display(),
            by = %located.by,
            "Resolved package manager"
        );
        self.package_managers.insert(language, located.clone());
        located
    }

    /// Forget cached lookups, e.g. after the user installed a runtime.
    pub fn clear_cache(&self) {
        self.interpreters.clear();
        self.package_managers.clear();
    }
}

async fn resolve(hints: ToolHints, home: Option<&Path>) -> Located {
    if let Some(home) = home {
        for manager in hints.version_managers {
            if let Some(path) = newest_installed(home, manager).await {
                return Located {
                    path,
                    by: LocatedBy::VersionManager,
                };
            }
        }
    }

    for command in hints.commands {
        if let Some(path) = which(command).await {
            return Located {
                path,
                by: LocatedBy::PathLookup,
            };
        }
    }

    let well_known = if cfg!(windows) {
        hints.windows_paths
    } else {
        hints.unix_paths
    };
    for candidate in well_known {
        if is_file(Path::new(candidate)).await {
            return Located {
                path: PathBuf::from(candidate),
                by: LocatedBy::WellKnown,
            };
        }
    }

    Located {
        path: PathBuf::from(hints.commands.first().copied().unwrap_or_default()),
        by: LocatedBy::Bare,
    }
}

/// Newest version under a version manager that has the executable.
async fn newest_installed(home: &Path, manager: &VersionManager) -> Option<PathBuf> {
    let root = home.join(manager.versions_dir);
    let mut entries = tokio::fs::read_dir(&root).await.ok()?;
    let mut versions = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(name) = entry.file_name().to_str() {
            versions.push(name.to_string());
        }
    }
    versions.sort_by(|a, b| compare_versions(b, a));

    for version in versions {
        let candidate = root.join(&version).join(manager.executable);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Numeric-aware version ordering: `v20.11.1` sorts above `v9.8.0`.
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    version_key(a).cmp(&version_key(b)).then_with(|| a.cmp(b))
}

fn version_key(name: &str) -> Vec<u64> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().unwrap_or(u64::MAX))
        .collect()
}

async fn which(command: &str) -> Option<PathBuf> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let output = tokio::process::Command::new(finder)
        .arg(command)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let path = PathBuf::from(first);
    is_file(&path).await.then_some(path)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}
