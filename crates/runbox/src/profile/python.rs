//! CPython profile.
//!
//! The snippet is parsed with `ast`; when the last statement is a bare
//! expression it is split off and evaluated separately to obtain the value.
//! User code runs in a fresh namespace so harness names never leak into it.

use std::ffi::OsString;
use std::path::Path;
use std::sync::LazyLock;

use super::{HarnessInput, RuntimeProfile, Sentinels, ToolHints, VersionManager};
use crate::error::Error;
use crate::language::Language;
use crate::transform::{AutoLog, AutoLogRules, LineAutoLog};

/// The Python 3 profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct Python;

const SENTINELS: Sentinels = Sentinels {
    start: "<<RUNBOX:PYTHON>>_RESULT_START",
    end: "<<RUNBOX:PYTHON>>_RESULT_END",
};

const OPERAND: &str = r#"(?:(?:not\s+|-)?(?:[A-Za-z_]\w*(?:\.[A-Za-z_]\w*|\[[^\]]*\]|\((?:[^()]|\([^()]*\))*\))*|\d[\d_]*(?:\.\d+)?j?|[rbfu]?"(?:[^"\\]|\\.)*"|[rbfu]?'(?:[^'\\]|\\.)*'))"#;
const BINARY: &str = r"(?:\*\*|//|==|!=|<=|>=|[-+*/%<>@&|^]|\s(?:and|or|in|not in|is not|is)\s)";

static EXPRESSION: LazyLock<String> =
    LazyLock::new(|| format!(r"^{OPERAND}(?:\s*{BINARY}\s*{OPERAND})*$"));

static AUTO_LOG: LazyLock<LineAutoLog> = LazyLock::new(|| {
    LineAutoLog::new(AutoLogRules {
        line_comments: &["#"],
        block_comment: None,
        block_strings: &[r#"""""#, "'''"],
        keywords: &[
            "def", "class", "if", "elif", "else", "for", "while", "try", "except", "finally",
            "with", "return", "import", "from", "raise", "pass", "break", "continue", "global",
            "nonlocal", "assert", "del", "lambda", "yield", "async", "await", "match", "case",
            "print",
        ],
        non_assignment_operators: &["==", "!=", "<=", ">="],
        block_openers: &[":", "{", "\\", ","],
        output_calls: &["print(", "sys.stdout.", "sys.stderr."],
        top_level_only: true,
        expression: EXPRESSION.as_str(),
        simple_identifier: r"^[A-Za-z_]\w*$",
        wrap: |expression, _| format!("print({expression})"),
        terminator: "",
    })
});

const TEMPLATE: &str = r#"import ast
import builtins
import json
import sys
import traceback
import warnings

_START = @@START@@
_END = @@END@@
_CODE = @@CODE@@
_PROBES = json.loads(@@PROBES@@)
_PACKAGES = @@PACKAGES@@
_FILENAME = "<snippet>"

if _PACKAGES not in sys.path:
    sys.path.insert(0, _PACKAGES)

_output = []
_real_stdout = sys.stdout
_real_stderr = sys.stderr
_real_print = builtins.print


def _record(kind, text):
    _output.append({"kind": kind, "text": text})


class _Capture:
    def __init__(self, kind):
        self.kind = kind
        self.pending = ""

    def write(self, text):
        text = str(text)
        self.pending += text
        while "\n" in self.pending:
            line, self.pending = self.pending.split("\n", 1)
            _record(self.kind, line)
        return len(text)

    def flush(self):
        if self.pending:
            _record(self.kind, self.pending)
            self.pending = ""

    def isatty(self):
        return False

    @property
    def encoding(self):
        return "utf-8"


_stdout = _Capture("log")
_stderr = _Capture("error")


def _print(*args, sep=" ", end="\n", file=None, flush=False):
    if file is None or file is _stdout or file is _stderr:
        target = _stderr if file is _stderr else _stdout
        target.flush()
        _record(target.kind, (" " if sep is None else sep).join(str(arg) for arg in args))
        return
    _real_print(*args, sep=sep, end=end, file=file, flush=flush)


def _showwarning(message, category, filename, lineno, file=None, line=None):
    _record("warn", f"{category.__name__}: {message}")


def _safe(value):
    try:
        return json.loads(json.dumps(value, allow_nan=False))
    except Exception:
        return "[Unserializable: " + type(value).__name__ + "]"


def _describe(exc):
    stack = "".join(traceback.format_exception(type(exc), exc, exc.__traceback__))
    return {"message": str(exc) or type(exc).__name__, "stack": stack}


def _run():
    result = {"output": _output, "error": None, "probes": []}
    namespace = {"__name__": "__main__", "__builtins__": builtins, "__file__": _FILENAME}
    sys.stdout = _stdout
    sys.stderr = _stderr
    builtins.print = _print
    warnings.showwarning = _showwarning
    try:
        try:
            tree = ast.parse(_CODE, filename=_FILENAME, mode="exec")
            tail = None
            if tree.body and isinstance(tree.body[-1], ast.Expr):
                tail = ast.Expression(tree.body.pop().value)
            exec(compile(tree, _FILENAME, "exec"), namespace)
            if tail is not None:
                value = eval(compile(tail, _FILENAME, "eval"), namespace)
                if value is not None:
                    result["value"] = _safe(value)
        except SystemExit as exc:
            if exc.code not in (None, 0):
                result["error"] = {"message": f"SystemExit: {exc.code}"}
        except BaseException as exc:
            result["error"] = _describe(exc)
        for line, expression in _PROBES:
            entry = {"line": line, "expression": expression, "value": None}
            try:
                entry["value"] = _safe(eval(expression, namespace))
            except BaseException as exc:
                entry["error"] = f"{type(exc).__name__}: {exc}"
            result["probes"].append(entry)
    finally:
        _stdout.flush()
        _stderr.flush()
        sys.stdout = _real_stdout
        sys.stderr = _real_stderr
        builtins.print = _real_print
    return result


def _emit(result):
    try:
        body = json.dumps(result, allow_nan=False)
    except Exception as exc:
        error = result.get("error") or {"message": f"Result could not be serialized: {exc}"}
        body = json.dumps({"output": _output, "error": error})
    out = sys.__stdout__ or _real_stdout
    out.write(_START + "\n" + body + "\n" + _END + "\n")
    out.flush()


try:
    _result = _run()
except BaseException as _exc:
    _result = {"output": _output, "error": _describe(_exc), "probes": []}
_emit(_result)
"#;

impl RuntimeProfile for Python {
    fn language(&self) -> Language {
        Language::Python
    }

    fn sentinels(&self) -> Sentinels {
        SENTINELS
    }

    fn script_extension(&self) -> &'static str {
        ".py"
    }

    fn interpreter(&self) -> ToolHints {
        ToolHints {
            commands: &["python3", "python"],
            version_managers: &[VersionManager {
                versions_dir: ".pyenv/versions",
                executable: "bin/python3",
            }],
            unix_paths: &[
                "/opt/homebrew/bin/python3",
                "/usr/local/bin/python3",
                "/usr/bin/python3",
                "/opt/local/bin/python3",
            ],
            windows_paths: &[
                r"C:\Python313\python.exe",
                r"C:\Python312\python.exe",
                r"C:\Python311\python.exe",
                r"C:\Windows\py.exe",
            ],
        }
    }

    fn package_manager(&self) -> ToolHints {
        ToolHints {
            commands: &["pip3", "pip"],
            version_managers: &[VersionManager {
                versions_dir: ".pyenv/versions",
                executable: "bin/pip3",
            }],
            unix_paths: &["/opt/homebrew/bin/pip3", "/usr/local/bin/pip3", "/usr/bin/pip3"],
            windows_paths: &[],
        }
    }

    fn interpreter_args(&self) -> &'static [&'static str] {
        &["-u"]
    }

    fn package_env(&self, packages_dir: &Path) -> Vec<(&'static str, OsString)> {
        vec![
            ("PYTHONPATH", super::prepend_path("PYTHONPATH", packages_dir)),
            ("PYTHONIOENCODING", OsString::from("utf-8")),
        ]
    }

    fn comment_markers(&self) -> &'static [&'static str] {
        &["#"]
    }

    fn auto_log(&self) -> &dyn AutoLog {
        &*AUTO_LOG
    }

    fn fatal_parse_markers(&self) -> &'static [&'static str] {
        &["SyntaxError:", "IndentationError:"]
    }

    fn render_harness(&self, input: &HarnessInput<'_>) -> Result<String, Error> {
        let probes: Vec<(usize, &str)> = input
            .probes
            .iter()
            .map(|probe| (probe.line, probe.expression.as_str()))
            .collect();
        let probes = serde_json::to_string(&probes)?;
        super::render(
            TEMPLATE,
            &[
                ("START", &super::json_literal(SENTINELS.start)?),
                ("END", &super::json_literal(SENTINELS.end)?),
                ("CODE", &super::json_literal(input.code)?),
                ("PROBES", &super::json_literal(&probes)?),
                (
                    "PACKAGES",
                    &super::json_literal(&input.packages_dir.to_string_lossy())?,
                ),
            ],
        )
    }
}
