//! End-to-end runs through real interpreters.
//!
//! Each test skips itself when the interpreter it needs is not installed.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use runbox::{ExecutionRequest, ExecutionResult, Language, LogKind};
use serde_json::json;
use tempfile::TempDir;

async fn run(language: Language, code: &str) -> Option<ExecutionResult> {
    run_with(ExecutionRequest::new(language, code)).await
}

async fn run_with(request: ExecutionRequest) -> Option<ExecutionResult> {
    let temp = TempDir::new().unwrap();
    let engine = common::engine_for(request.language(), common::builder(temp.path())).await?;
    let outcome = engine.submit(request).await.expect("submit");
    assert!(common::leftover_scripts(temp.path()).is_empty());
    assert_eq!(engine.in_flight(), 0);
    Some(outcome.into_result().expect("not cancelled"))
}

fn texts(result: &ExecutionResult) -> Vec<&str> {
    result.output.iter().map(|e| e.text.as_str()).collect()
}

// =============================================================================
// Round trip: auto-log plus a probe
// =============================================================================

#[tokio::test]
async fn javascript_round_trip() {
    let Some(result) = run(Language::JavaScript, "const x = 41; // $ x\nx + 1\n").await else {
        return;
    };
    assert!(result.error.is_none(), "{result:?}");
    assert_eq!(texts(&result), ["42"]);
    assert_eq!(result.probes.len(), 1);
    assert_eq!(result.probes[0].line, 1);
    assert_eq!(result.probes[0].value, Some(json!(41)));
    assert!(result.value.is_none());
    assert!(result.stats.is_some());
}

#[tokio::test]
async fn python_round_trip() {
    let Some(result) = run(Language::Python, "x = 41  # $ x\nx + 1\n").await else {
        return;
    };
    assert!(result.error.is_none(), "{result:?}");
    assert_eq!(texts(&result), ["42"]);
    assert_eq!(result.probes[0].value, Some(json!(41)));
    assert!(result.value.is_none());
}

#[tokio::test]
async fn php_round_trip() {
    let code = "<?php\n$x = 41; // $x\n$x + 1;\n";
    let Some(result) = run(Language::Php, code).await else {
        return;
    };
    assert!(result.error.is_none(), "{result:?}");
    assert_eq!(texts(&result), ["int(42)"]);
    assert_eq!(result.probes[0].line, 2);
    assert_eq!(result.probes[0].expression, "$x");
    assert_eq!(result.probes[0].value, Some(json!(41)));
    assert!(result.value.is_none());
}

#[tokio::test]
async fn ruby_round_trip() {
    let Some(result) = run(Language::Ruby, "x = 41 # $ x\nx + 1\n").await else {
        return;
    };
    assert!(result.error.is_none(), "{result:?}");
    assert_eq!(texts(&result), ["42"]);
    assert_eq!(result.probes[0].value, Some(json!(41)));
    // `p` returns its argument, which becomes the snippet's value.
    assert_eq!(result.value, Some(json!(42)));
}

// =============================================================================
// Errors keep the output produced before them
// =============================================================================

#[tokio::test]
async fn javascript_throw_midway() {
    let code = "console.log('before');\nthrow new Error('boom');\nconsole.log('after');\n";
    let Some(result) = run(Language::JavaScript, code).await else {
        return;
    };
    assert_eq!(texts(&result), ["before"]);
    let error = result.error.expect("error");
    assert_eq!(error.message, "boom");
    assert!(error.stack.is_some());
}

#[tokio::test]
async fn python_raise_midway() {
    let code = "print('before')\nraise ValueError('boom')\nprint('after')\n";
    let Some(result) = run(Language::Python, code).await else {
        return;
    };
    assert_eq!(texts(&result), ["before"]);
    assert_eq!(result.error.expect("error").message, "boom");
}

#[tokio::test]
async fn php_throw_midway() {
    let code = "<?php\necho \"before\\n\";\nthrow new Exception('boom');\necho 'after';\n";
    let Some(result) = run(Language::Php, code).await else {
        return;
    };
    assert_eq!(texts(&result), ["before"]);
    assert_eq!(result.error.expect("error").message, "boom");
}

#[tokio::test]
async fn ruby_raise_midway() {
    let code = "puts 'before'\nraise 'boom'\nputs 'after'\n";
    let Some(result) = run(Language::Ruby, code).await else {
        return;
    };
    assert_eq!(texts(&result), ["before"]);
    assert_eq!(result.error.expect("error").message, "boom");
}

// =============================================================================
// Output kinds, values and probes
// =============================================================================

#[tokio::test]
async fn silent_snippet_has_empty_output_and_no_error() {
    for (language, code) in [
        (Language::JavaScript, "let a = 1;\n"),
        (Language::Python, "a = 1\n"),
        (Language::Php, "<?php\n$a = 1;\n"),
        (Language::Ruby, "a = 1\n"),
    ] {
        let Some(result) = run(language, code).await else {
            continue;
        };
        assert!(result.output.is_empty(), "{language}: {result:?}");
        assert!(result.error.is_none(), "{language}: {result:?}");
    }
}

#[tokio::test]
async fn javascript_console_kinds_are_kept_in_order() {
    let code = "console.warn('w');\nconsole.info('i');\nconsole.error('e');\nconsole.log('l', 1);\n";
    let Some(result) = run(Language::JavaScript, code).await else {
        return;
    };
    let kinds: Vec<_> = result.output.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [LogKind::Warn, LogKind::Info, LogKind::Error, LogKind::Log]
    );
    assert_eq!(result.output[3].text, "l 1");
}

#[tokio::test]
async fn trailing_value_without_auto_log() {
    for language in [Language::JavaScript, Language::Python, Language::Ruby] {
        let request = ExecutionRequest::new(language, "21 * 2\n").with_auto_log(false);
        let Some(result) = run_with(request).await else {
            continue;
        };
        assert!(result.output.is_empty(), "{language}: {result:?}");
        assert_eq!(result.value, Some(json!(42)), "{language}");
    }
}

#[tokio::test]
async fn multi_line_strings_are_left_alone() {
    let code = "s = \"\"\"\nhello\n\"\"\"\nlen(s)\n";
    let Some(result) = run(Language::Python, code).await else {
        return;
    };
    assert!(result.error.is_none(), "{result:?}");
    assert_eq!(texts(&result), ["7"]);
}

#[tokio::test]
async fn javascript_awaits_promise_completion() {
    let request = ExecutionRequest::new(Language::JavaScript, "Promise.resolve(7)\n")
        .with_auto_log(false);
    let Some(result) = run_with(request).await else {
        return;
    };
    assert_eq!(result.value, Some(json!(7)));
}

#[tokio::test]
async fn probes_are_ordered_and_failures_are_reported() {
    let code = "a = 1  # $ a\nb = 2  # $ missing_name\nc = 3  # $ a + b + c\n";
    let Some(result) = run(Language::Python, code).await else {
        return;
    };
    let lines: Vec<_> = result.probes.iter().map(|p| p.line).collect();
    assert_eq!(lines, [1, 2, 3]);
    assert_eq!(result.probes[0].value, Some(json!(1)));
    assert!(result.probes[1].value.is_none());
    assert!(
        result.probes[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("NameError"))
    );
    assert_eq!(result.probes[2].value, Some(json!(6)));
}

#[tokio::test]
async fn unserializable_values_become_placeholders() {
    for (language, code, expected) in [
        (
            Language::JavaScript,
            "const f = () => 1; // $ f\n",
            "[Unserializable: function]",
        ),
        (Language::Python, "s = {1, 2}  # $ s\n", "[Unserializable: set]"),
    ] {
        let Some(result) = run(language, code).await else {
            continue;
        };
        assert_eq!(result.probes[0].value, Some(json!(expected)), "{language}");
    }
}

#[tokio::test]
async fn python_warnings_and_stderr_are_classified() {
    let code = "import sys, warnings\nwarnings.warn('careful')\nprint('oops', file=sys.stderr)\n";
    let request = ExecutionRequest::new(Language::Python, code).with_auto_log(false);
    let Some(result) = run_with(request).await else {
        return;
    };
    let kinds: Vec<_> = result.output.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [LogKind::Warn, LogKind::Error]);
    assert!(result.output[0].text.contains("careful"));
}

#[tokio::test]
async fn php_notices_become_output_entries() {
    let code = "<?php\ntrigger_error('heads up', E_USER_WARNING);\necho 'done';\n";
    let request = ExecutionRequest::new(Language::Php, code).with_auto_log(false);
    let Some(result) = run_with(request).await else {
        return;
    };
    assert_eq!(result.output[0].kind, LogKind::Warn);
    assert!(result.output[0].text.contains("heads up"));
    assert_eq!(result.output[1].text, "done");
    assert!(result.error.is_none());
}

// =============================================================================
// Spawn failures
// =============================================================================

#[tokio::test]
async fn broken_interpreter_path_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("no-such-interpreter");
    let engine = common::builder(temp.path())
        .with_interpreter(Language::JavaScript, &missing)
        .build();

    let outcome = engine
        .submit(ExecutionRequest::new(Language::JavaScript, "console.log(1)"))
        .await
        .expect("submit");
    let result = outcome.into_result().expect("not cancelled");

    assert!(result.output.is_empty());
    assert!(result.value.is_none());
    let message = result.error.expect("error").message;
    assert!(message.contains(&missing.display().to_string()), "{message}");
    assert!(common::leftover_scripts(temp.path()).is_empty());
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn unwritable_temp_dir_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    let engine = common::builder(&temp.path().join("missing/dir")).build();
    let result = engine
        .submit(ExecutionRequest::new(Language::Python, "1"))
        .await
        .expect("submit")
        .into_result()
        .expect("not cancelled");
    assert!(result.error.expect("error").message.contains("Failed to write script"));
}
