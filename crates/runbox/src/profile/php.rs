//! PHP CLI profile.
//!
//! Output capture relies on PHP's own output buffering: the snippet is
//! `eval`ed under `declare(ticks=1)` with a tick function that moves each
//! statement's buffered output into its own entry. PHP has no completion
//! value, so results never carry `value`.

use std::ffi::OsString;
use std::path::Path;
use std::sync::LazyLock;

use super::{HarnessInput, RuntimeProfile, Sentinels, ToolHints, VersionManager};
use crate::error::Error;
use crate::language::Language;
use crate::transform::{AutoLog, AutoLogRules, LineAutoLog};

/// The PHP profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct Php;

const SENTINELS: Sentinels = Sentinels {
    start: "<<RUNBOX:PHP>>_RESULT_START",
    end: "<<RUNBOX:PHP>>_RESULT_END",
};

const OPERAND: &str = r#"(?:!*(?:\$?[A-Za-z_\\][\w\\]*(?:->[A-Za-z_]\w*|::\$?[A-Za-z_]\w*|\[[^\]]*\]|\((?:[^()]|\([^()]*\))*\))*|\d[\d_]*(?:\.\d+)?|"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'))"#;
const BINARY: &str = r"(?:\*\*|===|!==|==|!=|<=>|<=|>=|&&|\|\||\?\?|[-+*/%<>.])";

static EXPRESSION: LazyLock<String> =
    LazyLock::new(|| format!(r"^{OPERAND}(?:\s*{BINARY}\s*{OPERAND})*$"));

static AUTO_LOG: LazyLock<LineAutoLog> = LazyLock::new(|| {
    LineAutoLog::new(AutoLogRules {
        line_comments: &["//", "#"],
        block_comment: Some(("/*", "*/")),
        block_strings: &[],
        keywords: &[
            "echo", "print", "return", "function", "fn", "class", "interface", "trait", "enum",
            "abstract", "final", "if", "else", "elseif", "foreach", "for", "while", "do",
            "switch", "match", "case", "default", "try", "catch", "finally", "throw", "use",
            "namespace", "require", "require_once", "include", "include_once", "global",
            "static", "const", "break", "continue", "declare", "unset", "public", "private",
            "protected", "new", "exit", "die", "var_dump", "var_export", "print_r", "printf",
        ],
        non_assignment_operators: &["===", "!==", "==", "!=", "<=>", "<=", ">=", "=>"],
        block_openers: &["{"],
        output_calls: &["var_dump(", "var_export(", "print_r(", "printf(", "echo ", "print "],
        top_level_only: false,
        expression: EXPRESSION.as_str(),
        simple_identifier: r"^\$[A-Za-z_]\w*$",
        wrap: |expression, simple| {
            if simple {
                format!("var_export({expression})")
            } else {
                format!("var_dump({expression})")
            }
        },
        terminator: ";",
    })
});

const TEMPLATE: &str = r#"<?php
final class __RunboxHarness
{
    const START = @@START@@;
    const END = @@END@@;
    const PACKAGES = @@PACKAGES@@;

    public static $output = [];
    public static $error = null;
    public static $probes = [];
    public static $level = 0;
    public static $probing = false;
    public static $emitted = false;

    public static function code()
    {
        $code = @@CODE@@;
        $trimmed = ltrim($code);
        if (strncmp($trimmed, '<?php', 5) === 0 || strncmp($trimmed, '<?=', 3) === 0) {
            $code = '?>' . $trimmed;
        }
        return 'declare(ticks=1);' . $code;
    }

    public static function probes()
    {
        return @@PROBES@@;
    }

    public static function record($kind, $text)
    {
        self::$output[] = ['kind' => $kind, 'text' => rtrim((string) $text, "\r\n")];
    }

    public static function flush()
    {
        if (self::$level === 0 || ob_get_level() !== self::$level) {
            return;
        }
        $text = ob_get_contents();
        if ($text !== false && $text !== '') {
            ob_clean();
            self::record('log', $text);
        }
    }

    public static function onError($severity, $message, $file = '', $line = 0)
    {
        if (!(error_reporting() & $severity)) {
            return false;
        }
        if (self::$probing) {
            throw new \ErrorException($message, 0, $severity, $file, $line);
        }
        self::flush();
        switch ($severity) {
            case E_USER_ERROR:
            case E_RECOVERABLE_ERROR:
                $kind = 'error';
                break;
            case E_NOTICE:
            case E_USER_NOTICE:
            case E_DEPRECATED:
            case E_USER_DEPRECATED:
                $kind = 'info';
                break;
            default:
                $kind = 'warn';
        }
        self::record($kind, $message . ' on line ' . $line);
        return true;
    }

    public static function describe($e)
    {
        return [
            'message' => $e->getMessage(),
            'stack' => get_class($e) . ': ' . $e->getMessage() . "\n" . $e->getTraceAsString(),
        ];
    }

    public static function safe($value)
    {
        $json = json_encode($value, JSON_INVALID_UTF8_SUBSTITUTE | JSON_PRESERVE_ZERO_FRACTION);
        if ($json === false) {
            $type = is_object($value) ? get_class($value) : gettype($value);
            return '[Unserializable: ' . $type . ']';
        }
        return json_decode($json);
    }

    public static function finish()
    {
        if (self::$emitted) {
            return;
        }
        self::$emitted = true;
        while (self::$level > 0 && ob_get_level() > self::$level) {
            ob_end_flush();
        }
        self::flush();
        if (self::$level > 0 && ob_get_level() === self::$level) {
            ob_end_clean();
        }
        $last = error_get_last();
        $fatal = [E_ERROR, E_PARSE, E_CORE_ERROR, E_COMPILE_ERROR];
        if (self::$error === null && $last !== null && in_array($last['type'], $fatal, true)) {
            self::$error = ['message' => $last['message']];
        }
        $flags = JSON_INVALID_UTF8_SUBSTITUTE | JSON_PRESERVE_ZERO_FRACTION | JSON_UNESCAPED_SLASHES;
        $body = json_encode(['output' => self::$output, 'error' => self::$error, 'probes' => self::$probes], $flags);
        if ($body === false) {
            $error = self::$error !== null
                ? self::$error
                : ['message' => 'Result could not be serialized: ' . json_last_error_msg()];
            $body = json_encode(['output' => self::$output, 'error' => $error], $flags);
        }
        fwrite(STDOUT, self::START . "\n" . $body . "\n" . self::END . "\n");
    }
}

set_include_path(__RunboxHarness::PACKAGES . PATH_SEPARATOR . get_include_path());
if (is_file(__RunboxHarness::PACKAGES . '/vendor/autoload.php')) {
    require_once __RunboxHarness::PACKAGES . '/vendor/autoload.php';
}

register_shutdown_function(['__RunboxHarness', 'finish']);
set_error_handler(['__RunboxHarness', 'onError']);
ob_start();
__RunboxHarness::$level = ob_get_level();
register_tick_function(['__RunboxHarness', 'flush']);

try {
    eval(__RunboxHarness::code());
} catch (\Throwable $__runboxError) {
    __RunboxHarness::flush();
    __RunboxHarness::$error = __RunboxHarness::describe($__runboxError);
}
__RunboxHarness::flush();
unregister_tick_function(['__RunboxHarness', 'flush']);

__RunboxHarness::$probing = true;
foreach (__RunboxHarness::probes() as $__runboxProbe) {
    $__runboxEntry = ['line' => $__runboxProbe[0], 'expression' => $__runboxProbe[1], 'value' => null];
    try {
        $__runboxEntry['value'] = __RunboxHarness::safe(eval('return ' . $__runboxProbe[1] . ";\n"));
    } catch (\Throwable $__runboxError) {
        $__runboxEntry['error'] = $__runboxError->getMessage();
    }
    __RunboxHarness::flush();
    __RunboxHarness::$probes[] = $__runboxEntry;
}
__RunboxHarness::$probing = false;

__RunboxHarness::finish();
"#;

impl RuntimeProfile for Php {
    fn language(&self) -> Language {
        Language::Php
    }

    fn sentinels(&self) -> Sentinels {
        SENTINELS
    }

    fn script_extension(&self) -> &'static str {
        ".php"
    }

    fn interpreter(&self) -> ToolHints {
        ToolHints {
            commands: &["php"],
            version_managers: &[
                VersionManager {
                    versions_dir: ".phpenv/versions",
                    executable: "bin/php",
                },
                VersionManager {
                    versions_dir: ".phpbrew/php",
                    executable: "bin/php",
                },
            ],
            unix_paths: &[
                "/opt/homebrew/bin/php",
                "/usr/local/bin/php",
                "/usr/bin/php",
                "/opt/local/bin/php",
            ],
            windows_paths: &[r"C:\php\php.exe", r"C:\tools\php\php.exe"],
        }
    }

    fn package_manager(&self) -> ToolHints {
        ToolHints {
            commands: &["composer"],
            version_managers: &[],
            unix_paths: &["/opt/homebrew/bin/composer", "/usr/local/bin/composer", "/usr/bin/composer"],
            windows_paths: &[r"C:\ProgramData\ComposerSetup\bin\composer.bat"],
        }
    }

    fn interpreter_args(&self) -> &'static [&'static str] {
        &["-d", "display_errors=stderr", "-d", "html_errors=0", "-d", "log_errors=0"]
    }

    fn package_env(&self, _packages_dir: &Path) -> Vec<(&'static str, OsString)> {
        // include_path and the composer autoloader are set up by the harness.
        Vec::new()
    }

    fn comment_markers(&self) -> &'static [&'static str] {
        &["//", "#"]
    }

    fn dollar_is_sigil(&self) -> bool {
        true
    }

    fn auto_log(&self) -> &dyn AutoLog {
        &*AUTO_LOG
    }

    fn fatal_parse_markers(&self) -> &'static [&'static str] {
        &["PHP Parse error", "Parse error:"]
    }

    fn render_harness(&self, input: &HarnessInput<'_>) -> Result<String, Error> {
        let probes = input
            .probes
            .iter()
            .map(|probe| format!("[{}, {}]", probe.line, super::single_quoted(&probe.expression)))
            .collect::<Vec<_>>()
            .join(", ");
        super::render(
            TEMPLATE,
            &[
                ("START", &super::single_quoted(SENTINELS.start)),
                ("END", &super::single_quoted(SENTINELS.end)),
                (
                    "PACKAGES",
                    &super::single_quoted(&input.packages_dir.to_string_lossy()),
                ),
                ("CODE", &super::single_quoted(input.code)),
                ("PROBES", &format!("[{probes}]")),
            ],
        )
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::execution::MagicComment;

    #[test]
    fn probes_become_a_php_array_literal() {
        let probes = [MagicComment::new(1, "$x"), MagicComment::new(3, "count($it's)")];
        let script = Php
            .render_harness(&HarnessInput {
                code: "<?php\n$x = 1;",
                probes: &probes,
                packages_dir: Path::new("/pkgs/php"),
            })
            .expect("render");

        assert!(script.contains(r"return [[1, '$x'], [3, 'count($it\'s)']];"));
        assert!(script.contains("$code = '<?php\n$x = 1;';"));
        assert!(script.starts_with("<?php\n"));
    }

    #[test]
    fn simple_identifier_pattern_requires_sigil() {
        let re = regex::Regex::new(r"^\$[A-Za-z_]\w*$").expect("pattern compiles");
        assert!(re.is_match("$total"));
        assert!(!re.is_match("total"));
        assert!(!re.is_match("$a->b"));
    }

    #[test]
    fn expression_pattern_accepts_php_chains() {
        let re = regex::Regex::new(&EXPRESSION).expect("pattern compiles");
        for ok in ["$user->name", "Foo::$bar", "strlen($s) . '!'", "$a['k'] ?? 0", "PHP_VERSION"] {
            assert!(re.is_match(ok), "{ok} should match");
        }
        for bad in ["$x = 1", "fn($x) => $x"] {
            assert!(!re.is_match(bad), "{bad} should not match");
        }
    }
}
