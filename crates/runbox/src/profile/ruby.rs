//! Ruby (MRI) profile.
//!
//! The snippet is `eval`ed against `TOPLEVEL_BINDING`, so locals it defines
//! stay visible to probes evaluated through the same binding. `$stdout` and
//! `$stderr` are swapped for capture objects while it runs.

use std::ffi::OsString;
use std::path::Path;
use std::sync::LazyLock;

use super::{HarnessInput, RuntimeProfile, Sentinels, ToolHints, VersionManager};
use crate::error::Error;
use crate::language::Language;
use crate::transform::{AutoLog, AutoLogRules, LineAutoLog};

/// The Ruby profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ruby;

const SENTINELS: Sentinels = Sentinels {
    start: "<<RUNBOX:RUBY>>_RESULT_START",
    end: "<<RUNBOX:RUBY>>_RESULT_END",
};

const OPERAND: &str = r#"(?:(?:not\s+|!+|-)?(?:[A-Za-z_$][\w]*[?!]?(?:\.[A-Za-z_]\w*[?!]?|::[A-Z]\w*|\[[^\]]*\]|\((?:[^()]|\([^()]*\))*\))*|@[A-Za-z_]\w*|\d[\d_]*(?:\.\d+)?|:[A-Za-z_]\w*[?!]?|"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'))"#;
const BINARY: &str =
    r"(?:\*\*|===|==|!=|<=>|<=|>=|&&|\|\||<<|[-+*/%<>&|^]|\s(?:and|or)\s)";

static EXPRESSION: LazyLock<String> =
    LazyLock::new(|| format!(r"^{OPERAND}(?:\s*{BINARY}\s*{OPERAND})*$"));

static AUTO_LOG: LazyLock<LineAutoLog> = LazyLock::new(|| {
    LineAutoLog::new(AutoLogRules {
        line_comments: &["#"],
        block_comment: Some(("=begin", "=end")),
        block_strings: &[],
        keywords: &[
            "def", "class", "module", "if", "elsif", "else", "unless", "case", "when", "while",
            "until", "for", "begin", "rescue", "ensure", "end", "return", "require",
            "require_relative", "puts", "print", "p", "pp", "warn", "raise", "yield", "do",
            "then", "break", "next", "redo", "retry", "alias", "undef", "include", "extend",
            "attr_accessor", "attr_reader", "attr_writer", "private", "public", "protected",
            "loop", "lambda", "proc",
        ],
        non_assignment_operators: &["<=>", "===", "==", "!=", "<=", ">=", "=~", "=>"],
        block_openers: &[" do", "{", "|", "\\", ","],
        output_calls: &["$stdout.", "$stderr.", "STDOUT.", "STDERR."],
        top_level_only: true,
        expression: EXPRESSION.as_str(),
        simple_identifier: r"^[a-z_]\w*$",
        wrap: |expression, _| format!("p({expression})"),
        terminator: "",
    })
});

const TEMPLATE: &str = r##"require 'json'

module RunboxHarness
  START = @@START@@
  STOP = @@END@@
  CODE = @@CODE@@
  PROBES = @@PROBES@@
  PACKAGES = @@PACKAGES@@
  OUTPUT = []

  def self.record(kind, text)
    text = text.to_s.dup.force_encoding(Encoding::UTF_8).scrub('?')
    OUTPUT << { 'kind' => kind, 'text' => text }
  end

  class Capture
    def initialize(kind)
      @kind = kind
      @pending = +''
    end

    def write(*parts)
      text = parts.map(&:to_s).join
      @pending << text
      while (index = @pending.index("\n"))
        RunboxHarness.record(@kind, @pending[0...index])
        @pending = @pending[(index + 1)..] || +''
      end
      text.bytesize
    end

    def <<(obj)
      write(obj)
      self
    end

    def print(*args)
      write(*args)
      nil
    end

    def puts(*args)
      flush
      args = [''] if args.empty?
      args.flatten.each do |arg|
        RunboxHarness.record(@kind, arg.nil? ? '' : arg.to_s.chomp("\n"))
      end
      nil
    end

    def flush
      unless @pending.empty?
        RunboxHarness.record(@kind, @pending)
        @pending = +''
      end
      self
    end

    def sync
      true
    end

    def sync=(_value); end

    def tty?
      false
    end
    alias isatty tty?
  end

  def self.safe(value)
    JSON.parse(JSON.generate([value]))[0]
  rescue StandardError, SystemStackError
    "[Unserializable: #{value.class}]"
  end

  def self.describe(error)
    message = error.message.to_s.scrub('?')
    stack = ["#{error.class}: #{message}"] + Array(error.backtrace)
    { 'message' => message, 'stack' => stack.join("\n") }
  end

  def self.run
    result = { 'output' => OUTPUT, 'error' => nil, 'probes' => [] }
    real_stdout = $stdout
    real_stderr = $stderr
    out = Capture.new('log')
    err = Capture.new('error')
    $stdout = out
    $stderr = err
    begin
      begin
        value = eval(CODE, TOPLEVEL_BINDING, 'snippet.rb', 1)
        result['value'] = safe(value) unless value.nil?
      rescue SystemExit => e
        result['error'] = { 'message' => "SystemExit: #{e.status}" } unless e.success?
      rescue Exception => e
        result['error'] = describe(e)
      end
      PROBES.each do |line, expression|
        entry = { 'line' => line, 'expression' => expression, 'value' => nil }
        begin
          entry['value'] = safe(eval(expression, TOPLEVEL_BINDING, 'probe.rb', 1))
        rescue Exception => e
          entry['error'] = "#{e.class}: #{e.message}"
        end
        result['probes'] << entry
      end
    ensure
      out.flush
      err.flush
      $stdout = real_stdout
      $stderr = real_stderr
    end
    result
  end

  def self.emit(result)
    body = begin
      JSON.generate(result)
    rescue StandardError => e
      error = result['error'] || { 'message' => "Result could not be serialized: #{e.message}" }
      JSON.generate('output' => OUTPUT, 'error' => error)
    end
    STDOUT.write(START + "\n" + body + "\n" + STOP + "\n")
    STDOUT.flush
  end
end

module Warning
  def self.warn(message, *_rest, **_options)
    RunboxHarness.record('warn', message.to_s.chomp)
    nil
  end
end

$LOAD_PATH.unshift(RunboxHarness::PACKAGES)

RunboxHarness.emit(
  begin
    RunboxHarness.run
  rescue Exception => e
    { 'output' => RunboxHarness::OUTPUT, 'error' => RunboxHarness.describe(e), 'probes' => [] }
  end
)
"##;

impl RuntimeProfile for Ruby {
    fn language(&self) -> Language {
        Language::Ruby
    }

    fn sentinels(&self) -> Sentinels {
        SENTINELS
    }

    fn script_extension(&self) -> &'static str {
        ".rb"
    }

    fn interpreter(&self) -> ToolHints {
        ToolHints {
            commands: &["ruby"],
            version_managers: &[
                VersionManager {
                    versions_dir: ".rbenv/versions",
                    executable: "bin/ruby",
                },
                VersionManager {
                    versions_dir: ".rubies",
                    executable: "bin/ruby",
                },
                VersionManager {
                    versions_dir: ".rvm/rubies",
                    executable: "bin/ruby",
                },
                VersionManager {
                    versions_dir: ".asdf/installs/ruby",
                    executable: "bin/ruby",
                },
            ],
            unix_paths: &[
                "/opt/homebrew/opt/ruby/bin/ruby",
                "/usr/local/bin/ruby",
                "/usr/bin/ruby",
                "/opt/local/bin/ruby",
            ],
            windows_paths: &[r"C:\Ruby33-x64\bin\ruby.exe", r"C:\Ruby32-x64\bin\ruby.exe"],
        }
    }

    fn package_manager(&self) -> ToolHints {
        ToolHints {
            commands: &["gem"],
            version_managers: &[VersionManager {
                versions_dir: ".rbenv/versions",
                executable: "bin/gem",
            }],
            unix_paths: &["/opt/homebrew/opt/ruby/bin/gem", "/usr/local/bin/gem", "/usr/bin/gem"],
            windows_paths: &[r"C:\Ruby33-x64\bin\gem.cmd"],
        }
    }

    fn interpreter_args(&self) -> &'static [&'static str] {
        &["-EUTF-8"]
    }

    fn package_env(&self, packages_dir: &Path) -> Vec<(&'static str, OsString)> {
        vec![("GEM_PATH", super::prepend_path("GEM_PATH", packages_dir))]
    }

    fn comment_markers(&self) -> &'static [&'static str] {
        &["#"]
    }

    fn auto_log(&self) -> &dyn AutoLog {
        &*AUTO_LOG
    }

    fn fatal_parse_markers(&self) -> &'static [&'static str] {
        &["syntax error", "(SyntaxError)"]
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
                ("CODE", &super::single_quoted(input.code)),
                ("PROBES", &format!("[{probes}].freeze")),
                (
                    "PACKAGES",
                    &super::single_quoted(&input.packages_dir.to_string_lossy()),
                ),
            ],
        )
    }
}
