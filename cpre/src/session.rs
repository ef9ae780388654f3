use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Local;

use crate::config::{Dialect, PreprocessorConfig};
use crate::diag::{Diagnostic, Severity};
use crate::macro_def::{MacroDef, MagicMacro};
use crate::macro_table::MacroTable;
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};

/// Which directive opened a conditional group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CondKind {
    If,
    Ifdef,
    Ifndef,
}

impl CondKind {
    pub(crate) fn directive_name(self) -> &'static str {
        match self {
            CondKind::If => "#if",
            CondKind::Ifdef => "#ifdef",
            CondKind::Ifndef => "#ifndef",
        }
    }
}

/// One `#if`..`#endif` group on the conditional stack.
#[derive(Clone, Debug)]
pub(crate) struct CondFrame {
    pub(crate) kind: CondKind,
    /// Whether the enclosing context was compiling when the group opened.
    pub(crate) parent_active: bool,
    /// Whether the current branch is compiling.
    pub(crate) active: bool,
    /// Whether any branch of this group has been taken.
    pub(crate) any_taken: bool,
    /// Whether `#else` has been seen, after which `#elif`/`#else` are errors.
    pub(crate) seen_else: bool,
}

impl CondFrame {
    pub(crate) fn new(kind: CondKind, parent_active: bool, taken: bool) -> Self {
        CondFrame {
            kind,
            parent_active,
            active: parent_active && taken,
            any_taken: parent_active && taken,
            seen_else: false,
        }
    }
}

/// A file context suspended by `#include`, restored when the included
/// file's source is exhausted.
#[derive(Clone, Debug)]
pub(crate) struct IncludeFrame {
    pub(crate) file: String,
    pub(crate) line: usize,
    /// Index into the search-directory list where the suspended file was
    /// found, used by `#include_next` to resume after it.
    pub(crate) dir_index: Option<usize>,
    /// Conditional-stack depth on entry; the included file must return to it.
    pub(crate) cond_base: usize,
}

/// All mutable state of one preprocessing run.
///
/// Constructed fresh per run and passed to every component; [`reset`] returns
/// it to the post-configuration initial state so one process can run many
/// independent passes.
///
/// [`reset`]: Session::reset
pub(crate) struct Session {
    pub(crate) config: PreprocessorConfig,
    pub(crate) macros: MacroTable,
    pub(crate) cond_stack: Vec<CondFrame>,
    pub(crate) include_stack: Vec<IncludeFrame>,
    pub(crate) once_included: HashSet<PathBuf>,
    pub(crate) dependencies: Vec<PathBuf>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) error_count: usize,
    pub(crate) current_file: String,
    pub(crate) current_line: usize,
    /// Where the current file was found in the search list, for
    /// `#include_next`.
    pub(crate) current_dir_index: Option<usize>,
    /// `__DATE__`/`__TIME__` text, fixed for the whole translation.
    date: String,
    time: String,
}

impl Session {
    pub(crate) fn new(config: PreprocessorConfig) -> Self {
        let now = Local::now();
        let mut session = Session {
            config,
            macros: MacroTable::new(),
            cond_stack: Vec::new(),
            include_stack: Vec::new(),
            once_included: HashSet::new(),
            dependencies: Vec::new(),
            diagnostics: Vec::new(),
            error_count: 0,
            current_file: "<stdin>".to_string(),
            current_line: 1,
            current_dir_index: None,
            date: now.format("%b %e %Y").to_string(),
            time: now.format("%H:%M:%S").to_string(),
        };
        session.install_builtin_macros();
        session
    }

    /// Restore the post-configuration initial state, dropping every macro,
    /// conditional frame, file frame, once-record, and diagnostic of the
    /// previous run.
    pub(crate) fn reset(&mut self) {
        self.macros.clear();
        self.cond_stack.clear();
        self.include_stack.clear();
        self.once_included.clear();
        self.dependencies.clear();
        self.diagnostics.clear();
        self.error_count = 0;
        self.current_file = "<stdin>".to_string();
        self.current_line = 1;
        self.current_dir_index = None;
        self.install_builtin_macros();
    }

    /// Define the magic macros and the dialect's standard predefines.
    /// Configuration-supplied `-D`/`-U` definitions are applied afterwards
    /// by the driver, which owns `#define` parsing.
    fn install_builtin_macros(&mut self) {
        self.macros.define(MacroDef::magic("__LINE__", MagicMacro::Line));
        self.macros.define(MacroDef::magic("__FILE__", MagicMacro::File));
        self.macros.define(MacroDef::magic("__DATE__", MagicMacro::Date));
        self.macros.define(MacroDef::magic("__TIME__", MagicMacro::Time));
        self.macros.define(MacroDef::magic("_Pragma", MagicMacro::Pragma));

        match self.config.dialect {
            Dialect::C90 => {
                self.define_object("__STDC__", "1");
                self.define_object("__STDC_VERSION__", "199409L");
            }
            Dialect::C99 | Dialect::PostStandard => {
                self.define_object("__STDC__", "1");
                self.define_object("__STDC_VERSION__", "199901L");
                self.define_object("__STDC_HOSTED__", "1");
            }
            Dialect::Cplusplus => {
                self.define_object("__cplusplus", "199711L");
            }
            Dialect::KAndR | Dialect::PreStandard => {}
        }
    }

    fn define_object(&mut self, name: &str, body: &str) {
        self.macros
            .define(MacroDef::object(name, Scanner::tokenize_line(body)));
    }

    /// Compute the replacement token for a magic macro reference.
    /// `_Pragma` is not computed here; the driver rewrites it as a
    /// `#pragma` line after expansion.
    pub(crate) fn magic_token(&self, which: MagicMacro) -> Token {
        match which {
            MagicMacro::Line => Token::new(TokenKind::Number, self.current_line.to_string()),
            MagicMacro::File => Token::new(
                TokenKind::StringLit,
                format!("\"{}\"", escape_string_body(&self.current_file)),
            ),
            MagicMacro::Date => Token::new(TokenKind::StringLit, format!("\"{}\"", self.date)),
            MagicMacro::Time => Token::new(TokenKind::StringLit, format!("\"{}\"", self.time)),
            MagicMacro::Pragma => Token::ident("_Pragma"),
        }
    }

    /// Record a file the run touched, once, for the external dependency
    /// writer.
    pub(crate) fn record_dependency(&mut self, path: &PathBuf) {
        if !self.dependencies.contains(path) {
            self.dependencies.push(path.clone());
        }
    }

    /// Emit a warning of the given class, subject to the warning-level
    /// bitmask.
    pub(crate) fn warn<S: Into<String>>(&mut self, class: u32, message: S) {
        if self.config.warn_level & class != 0 {
            self.emit(Severity::Warning, message.into());
        }
    }

    /// Emit a recoverable error diagnostic.
    pub(crate) fn error<S: Into<String>>(&mut self, message: S) {
        self.error_count += 1;
        self.emit(Severity::Error, message.into());
    }

    fn emit(&mut self, severity: Severity, message: String) {
        let diag = Diagnostic {
            severity,
            message,
            file: self.current_file.clone(),
            line: self.current_line,
        };
        if let Some(handler) = &self.config.diagnostic_handler {
            handler(&diag);
        }
        self.diagnostics.push(diag);
    }

    /// Position string for fatal-error payloads.
    pub(crate) fn position(&self) -> String {
        format!("{}:{}", self.current_file, self.current_line)
    }
}

/// Escape backslashes and quotes for embedding in a string literal.
pub(crate) fn escape_string_body(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
