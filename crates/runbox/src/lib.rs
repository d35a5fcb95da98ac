//! # Runbox
//!
//! Run scratchpad snippets of JavaScript, Python, PHP and Ruby in child
//! interpreters and get back a structured result.
//!
//! A snippet goes through a short pipeline:
//!
//! - **Magic comments** - `// $ expr` style annotations become probes whose
//!   values are reported next to the line they sit on
//! - **Auto-log** - bare expression lines are wrapped in the language's
//!   output call so their values show up without an explicit `print`
//! - **Instrumentation** - the snippet is embedded in a harness that
//!   captures output, traps errors, evaluates probes and writes one framed
//!   JSON payload to stdout
//! - **Execution** - the harness runs under the real interpreter as a child
//!   process, tracked in a registry so it can be cancelled
//! - **Result recovery** - the payload is parsed back, falling back through
//!   a ladder of recovery steps when the output is damaged
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runbox::{Engine, ExecutionRequest, Language};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), runbox::Error> {
//!     let engine = Engine::builder().build();
//!
//!     let request = ExecutionRequest::new(Language::Python, "x = 41  # $ x\nx + 1\n");
//!     if let Some(result) = engine.submit(request).await?.into_result() {
//!         for entry in &result.output {
//!             println!("{}", entry.text);
//!         }
//!         println!("probes: {:?}", result.probes);
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod engine;
mod error;
mod execution;
mod executor;
pub mod instrument;
mod language;
pub mod locator;
pub mod magic;
pub mod profile;
pub mod protocol;
mod registry;
mod session;
pub mod transform;

pub use engine::{Engine, EngineBuilder, EngineConfig, ExecutionRequest, ResourceLimits};
pub use error::Error;
pub use execution::{
    ExecuteStats, ExecutionError, ExecutionId, ExecutionOutcome, ExecutionResult, LogEntry,
    LogKind, MagicComment, ProbeResult,
};
pub use language::{Language, UnknownLanguage};
pub use locator::{Located, LocatedBy};
pub use registry::ProcessRegistry;
pub use session::Session;
