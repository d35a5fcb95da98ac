//! The execution engine façade.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::execution::{ExecutionId, ExecutionOutcome, MagicComment};
use crate::executor::ProcessExecutor;
use crate::instrument::InstrumentedScript;
use crate::language::Language;
use crate::locator::{Located, RuntimeLocator};
use crate::magic;
use crate::registry::ProcessRegistry;
use crate::session::Session;

/// Runs snippets in child interpreters.
///
/// Cheap to clone; clones share the process registry and locator cache.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    locator: RuntimeLocator,
    registry: ProcessRegistry,
    executor: ProcessExecutor,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine builder.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Run one snippet to completion.
    ///
    /// Resolves to [`ExecutionOutcome::Finished`] for every run that reached
    /// an end on its own, including runs whose snippet threw, whose
    /// interpreter could not be started or whose output was damaged: those
    /// carry the problem in [`ExecutionResult::error`](crate::ExecutionResult::error).
    /// Resolves to [`ExecutionOutcome::Cancelled`] if [`cancel`](Self::cancel)
    /// or [`cancel_all`](Self::cancel_all) hit the run before its result was
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateExecution`] if a run with the same id is in
    /// flight, and [`Error::Instrumentation`] if the snippet could not be
    /// turned into a program.
    #[tracing::instrument(
        skip(self, request),
        fields(execution_id = %request.id(), language = %request.language())
    )]
    pub async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, Error> {
        let inner = &self.inner;
        let registration = inner.registry.register(request.id)?;

        let language = request.language;
        let packages_dir = inner.config.packages_dir(language);
        let script = InstrumentedScript::build(
            language,
            &request.code,
            &request.magic_comments,
            request.auto_log.unwrap_or(inner.config.auto_log),
            &packages_dir,
        )?;
        let interpreter = inner.locator.locate_interpreter(language).await;

        if registration.token().is_cancelled() {
            return Ok(ExecutionOutcome::Cancelled);
        }

        let outcome = inner
            .executor
            .run(
                request.id,
                &script,
                &interpreter.path,
                &packages_dir,
                registration.token(),
            )
            .await;
        drop(registration);
        Ok(outcome)
    }

    /// Stop one in-flight run. Returns `false` if it was not running.
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        self.inner.registry.cancel(id)
    }

    /// Stop every in-flight run. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.inner.registry.cancel_all()
    }

    /// Whether `id` is still running.
    #[must_use]
    pub fn is_running(&self, id: &ExecutionId) -> bool {
        self.inner.registry.contains(id)
    }

    /// Number of runs in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Open a session that runs one snippet at a time.
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    /// The configuration this engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Resolve the interpreter used for `language`.
    pub async fn locate_interpreter(&self, language: Language) -> Located {
        self.inner.locator.locate_interpreter(language).await
    }

    /// Resolve the package manager for `language`.
    pub async fn locate_package_manager(&self, language: Language) -> Located {
        self.inner.locator.locate_package_manager(language).await
    }
}

/// A snippet submitted for execution.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    id: ExecutionId,
    language: Language,
    code: String,
    magic_comments: Vec<MagicComment>,
    auto_log: Option<bool>,
}

impl ExecutionRequest {
    /// A request for `code` with a fresh id and the probes found in it.
    #[must_use]
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        let code = code.into();
        let magic_comments = magic::extract(&code, language);
        Self {
            id: ExecutionId::new(),
            language,
            code,
            magic_comments,
            auto_log: None,
        }
    }

    /// Use a caller-chosen id, e.g. to cancel the run from elsewhere.
    #[must_use]
    pub fn with_id(mut self, id: ExecutionId) -> Self {
        self.id = id;
        self
    }

    /// Replace the extracted probes.
    #[must_use]
    pub fn with_magic_comments(mut self, magic_comments: Vec<MagicComment>) -> Self {
        self.magic_comments = magic_comments;
        self
    }

    /// Override the engine's auto-log default for this run.
    #[must_use]
    pub fn with_auto_log(mut self, enabled: bool) -> Self {
        self.auto_log = Some(enabled);
        self
    }

    /// Identifier used for cancellation.
    #[must_use]
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// Target language.
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    /// The snippet as submitted.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Probes to evaluate.
    #[must_use]
    pub fn magic_comments(&self) -> &[MagicComment] {
        &self.magic_comments
    }
}

/// Limits applied to every run.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Wall-clock limit for one run. `None` waits forever.
    pub execution_timeout: Option<Duration>,
}

/// Resolved engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    packages_root: PathBuf,
    packages_dirs: HashMap<Language, PathBuf>,
    interpreters: HashMap<Language, PathBuf>,
    temp_dir: PathBuf,
    resource_limits: ResourceLimits,
    auto_log: bool,
}

impl EngineConfig {
    /// Per-user package directory for `language`.
    #[must_use]
    pub fn packages_dir(&self, language: Language) -> PathBuf {
        self.packages_dirs
            .get(&language)
            .cloned()
            .unwrap_or_else(|| self.packages_root.join(language.as_str()))
    }

    /// Directory receiving the temporary script files.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Limits applied to every run.
    #[must_use]
    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.resource_limits
    }

    /// Whether auto-log is on unless a request says otherwise.
    #[must_use]
    pub fn auto_log(&self) -> bool {
        self.auto_log
    }
}

/// Builder for constructing an [`Engine`].
#[derive(Debug, Default)]
pub struct EngineBuilder {
    packages_root: Option<PathBuf>,
    packages_dirs: HashMap<Language, PathBuf>,
    interpreters: HashMap<Language, PathBuf>,
    temp_dir: Option<PathBuf>,
    resource_limits: ResourceLimits,
    auto_log: Option<bool>,
}

impl EngineBuilder {
    /// Create a new engine builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Root holding one package directory per language.
    ///
    /// Defaults to `<data dir>/runbox/packages`.
    #[must_use]
    pub fn with_packages_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.packages_root = Some(root.into());
        self
    }

    /// Package directory for one language, overriding the root.
    #[must_use]
    pub fn with_packages_dir(mut self, language: Language, dir: impl Into<PathBuf>) -> Self {
        self.packages_dirs.insert(language, dir.into());
        self
    }

    /// Use this interpreter for `language` instead of searching for one.
    #[must_use]
    pub fn with_interpreter(mut self, language: Language, path: impl Into<PathBuf>) -> Self {
        self.interpreters.insert(language, path.into());
        self
    }

    /// Directory for temporary script files. Defaults to the OS temp dir.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Set resource limits for every run.
    #[must_use]
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    /// Turn auto-log on or off by default. On unless set.
    #[must_use]
    pub fn with_auto_log(mut self, enabled: bool) -> Self {
        self.auto_log = Some(enabled);
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        let packages_root = self.packages_root.unwrap_or_else(default_packages_root);
        let temp_dir = self.temp_dir.unwrap_or_else(std::env::temp_dir);
        let config = EngineConfig {
            packages_root,
            packages_dirs: self.packages_dirs,
            interpreters: self.interpreters,
            temp_dir,
            resource_limits: self.resource_limits,
            auto_log: self.auto_log.unwrap_or(true),
        };

        tracing::debug!(?config, "Building engine");

        let locator = RuntimeLocator::new(config.interpreters.clone());
        let executor = ProcessExecutor::new(
            config.temp_dir.clone(),
            config.resource_limits.execution_timeout,
        );
        Engine {
            inner: Arc::new(EngineInner {
                config,
                locator,
                registry: ProcessRegistry::new(),
                executor,
            }),
        }
    }
}

fn default_packages_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("runbox")
        .join("packages")
}
