//! Shared helpers for integration tests that need real interpreters.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use runbox::{Engine, EngineBuilder, Language};

/// Builder writing scripts into `temp` and pointing packages somewhere inert.
pub fn builder(temp: &Path) -> EngineBuilder {
    Engine::builder()
        .with_temp_dir(temp)
        .with_packages_root(std::env::temp_dir().join("runbox-test-packages"))
}

/// An engine for `language`, or `None` (with a message) when no working
/// interpreter is installed.
pub async fn engine_for(language: Language, builder: EngineBuilder) -> Option<Engine> {
    let engine = builder.build();
    let interpreter = engine.locate_interpreter(language).await;
    let works = tokio::process::Command::new(&interpreter.path)
        .arg("--version")
        .output()
        .await
        .is_ok_and(|output| output.status.success());
    if works {
        Some(engine)
    } else {
        eprintln!(
            "skipping: no working {language} interpreter (tried {})",
            interpreter.path.display()
        );
        None
    }
}

/// Script files left behind in `dir`.
pub fn leftover_scripts(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("read temp dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("runbox-"))
        .collect()
}
