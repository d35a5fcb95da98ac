//! Node.js profile.
//!
//! The snippet runs through `vm.runInThisContext`, which gives us the
//! completion value of the last statement and keeps top-level `let`/`const`
//! bindings reachable for probes evaluated afterwards. `console.*` calls are
//! intercepted into the output buffer; the payload is written once, when the
//! event loop drains (or on `exit`).

use std::ffi::OsString;
use std::path::Path;
use std::sync::LazyLock;

use super::{HarnessInput, RuntimeProfile, Sentinels, ToolHints, VersionManager};
use crate::error::Error;
use crate::language::Language;
use crate::transform::{AutoLog, AutoLogRules, LineAutoLog};

/// The JavaScript (Node.js) profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaScript;

const SENTINELS: Sentinels = Sentinels {
    start: "<<RUNBOX:JAVASCRIPT>>_RESULT_START",
    end: "<<RUNBOX:JAVASCRIPT>>_RESULT_END",
};

const OPERAND: &str = r#"(?:!*(?:[A-Za-z_$][\w$]*(?:\??\.[A-Za-z_$][\w$]*|\[[^\]]*\]|\((?:[^()]|\([^()]*\))*\))*|\d[\d_]*(?:\.\d+)?n?|"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`(?:[^`\\]|\\.)*`))"#;
const BINARY: &str = r"(?:\*\*|===|!==|==|!=|<=|>=|&&|\|\||\?\?|[-+*/%<>])";

static EXPRESSION: LazyLock<String> =
    LazyLock::new(|| format!(r"^{OPERAND}(?:\s*{BINARY}\s*{OPERAND})*$"));

static AUTO_LOG: LazyLock<LineAutoLog> = LazyLock::new(|| {
    LineAutoLog::new(AutoLogRules {
        line_comments: &["//"],
        block_comment: Some(("/*", "*/")),
        block_strings: &["`"],
        keywords: &[
            "const", "let", "var", "function", "class", "if", "else", "for", "while", "do",
            "switch", "case", "default", "return", "throw", "try", "catch", "finally", "import",
            "export", "break", "continue", "async", "await", "yield", "new", "delete", "typeof",
            "void", "debugger", "with",
        ],
        non_assignment_operators: &["===", "!==", "==", "!=", "<=", ">=", "=>"],
        block_openers: &["{"],
        output_calls: &["console."],
        top_level_only: false,
        expression: EXPRESSION.as_str(),
        simple_identifier: r"^[A-Za-z_$][\w$]*$",
        wrap: |expression, _| format!("console.log({expression})"),
        terminator: ";",
    })
});

const TEMPLATE: &str = r#"const __rbVm = require('vm');
const __rbUtil = require('util');

const __RB_START = @@START@@;
const __RB_END = @@END@@;
const __rbCode = @@CODE@@;
const __rbProbes = @@PROBES@@;
const __rbPackages = @@PACKAGES@@;

const __rb = { output: [], error: null, probes: [], hasValue: false, value: undefined, emitted: false };

module.paths.unshift(__rbPackages);
globalThis.require = require;

function __rbRecord(kind, args) {
  let text;
  try {
    text = __rbUtil.format(...args);
  } catch (err) {
    text = '[unformattable output]';
  }
  __rb.output.push({ kind, text });
}

for (const kind of ['log', 'info', 'warn', 'error', 'debug', 'trace']) {
  const target = kind === 'debug' || kind === 'trace' ? 'log' : kind;
  console[kind] = (...args) => __rbRecord(target, args);
}
console.dir = (obj, options) => __rbRecord('log', [__rbUtil.inspect(obj, options)]);
console.table = (data) => __rbRecord('log', [__rbUtil.inspect(data)]);

function __rbSafe(value) {
  if (value === undefined) return undefined;
  if (typeof value === 'function' || typeof value === 'symbol') {
    return '[Unserializable: ' + typeof value + ']';
  }
  if (typeof value === 'bigint') return value.toString();
  try {
    const text = JSON.stringify(value);
    return text === undefined ? null : JSON.parse(text);
  } catch (err) {
    const ctor = value && value.constructor && value.constructor.name;
    return '[Unserializable: ' + (ctor || typeof value) + ']';
  }
}

function __rbError(err) {
  if (err && typeof err === 'object' && typeof err.message === 'string') {
    const described = { message: err.message };
    if (typeof err.stack === 'string') described.stack = err.stack;
    return described;
  }
  try {
    return { message: String(err) };
  } catch (_) {
    return { message: 'Unknown error' };
  }
}

function __rbEmit() {
  if (__rb.emitted) return;
  __rb.emitted = true;
  let body;
  try {
    const payload = { output: __rb.output, error: __rb.error, probes: __rb.probes };
    if (__rb.hasValue) payload.value = __rbSafe(__rb.value);
    body = JSON.stringify(payload);
  } catch (err) {
    body = JSON.stringify({
      output: __rb.output,
      error: __rb.error || { message: 'Result could not be serialized: ' + __rbError(err).message },
    });
  }
  process.stdout.write(__RB_START + '\n' + body + '\n' + __RB_END + '\n');
}

process.on('uncaughtException', (err) => {
  if (!__rb.error) __rb.error = __rbError(err);
});
process.on('unhandledRejection', (reason) => {
  if (!__rb.error) __rb.error = __rbError(reason);
});
process.on('beforeExit', __rbEmit);
process.on('exit', __rbEmit);

let __rbCompletion;
try {
  __rbCompletion = __rbVm.runInThisContext(__rbCode, { filename: 'snippet.js' });
  __rb.hasValue = true;
} catch (err) {
  __rb.error = __rbError(err);
}

for (const probe of __rbProbes) {
  const entry = { line: probe.line, expression: probe.expression, value: null };
  try {
    const value = __rbSafe(__rbVm.runInThisContext('(' + probe.expression + '\n)', { filename: 'probe.js' }));
    entry.value = value === undefined ? null : value;
  } catch (err) {
    entry.error = __rbError(err).message;
  }
  __rb.probes.push(entry);
}

if (__rb.hasValue && __rbCompletion && typeof __rbCompletion.then === 'function') {
  __rb.hasValue = false;
  Promise.resolve(__rbCompletion).then(
    (value) => {
      __rb.value = value;
      __rb.hasValue = true;
    },
    (err) => {
      if (!__rb.error) __rb.error = __rbError(err);
    },
  );
} else {
  __rb.value = __rbCompletion;
}
"#;

impl RuntimeProfile for JavaScript {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn sentinels(&self) -> Sentinels {
        SENTINELS
    }

    fn script_extension(&self) -> &'static str {
        ".cjs"
    }

    fn interpreter(&self) -> ToolHints {
        ToolHints {
            commands: &["node"],
            version_managers: &[
                VersionManager {
                    versions_dir: ".nvm/versions/node",
                    executable: "bin/node",
                },
                VersionManager {
                    versions_dir: ".volta/tools/image/node",
                    executable: "bin/node",
                },
                VersionManager {
                    versions_dir: ".local/share/fnm/node-versions",
                    executable: "installation/bin/node",
                },
            ],
            unix_paths: &[
                "/opt/homebrew/bin/node",
                "/usr/local/bin/node",
                "/usr/bin/node",
                "/opt/local/bin/node",
            ],
            windows_paths: &[
                r"C:\Program Files\nodejs\node.exe",
                r"C:\Program Files (x86)\nodejs\node.exe",
            ],
        }
    }

    fn package_manager(&self) -> ToolHints {
        ToolHints {
            commands: &["npm"],
            version_managers: &[VersionManager {
                versions_dir: ".nvm/versions/node",
                executable: "bin/npm",
            }],
            unix_paths: &["/opt/homebrew/bin/npm", "/usr/local/bin/npm", "/usr/bin/npm"],
            windows_paths: &[r"C:\Program Files\nodejs\npm.cmd"],
        }
    }

    fn package_env(&self, packages_dir: &Path) -> Vec<(&'static str, OsString)> {
        vec![(
            "NODE_PATH",
            super::prepend_path("NODE_PATH", &packages_dir.join("node_modules")),
        )]
    }

    fn comment_markers(&self) -> &'static [&'static str] {
        &["//"]
    }

    fn auto_log(&self) -> &dyn AutoLog {
        &*AUTO_LOG
    }

    fn fatal_parse_markers(&self) -> &'static [&'static str] {
        &["SyntaxError:"]
    }

    fn render_harness(&self, input: &HarnessInput<'_>) -> Result<String, Error> {
        let probes = serde_json::to_string(input.probes)?;
        let packages = input.packages_dir.join("node_modules");
        super::render(
            TEMPLATE,
            &[
                ("START", &super::json_literal(SENTINELS.start)?),
                ("END", &super::json_literal(SENTINELS.end)?),
                ("CODE", &super::json_literal(input.code)?),
                ("PROBES", &probes),
                ("PACKAGES", &super::json_literal(&packages.to_string_lossy())?),
            ],
        )
    }
}
