use std::path::PathBuf;
use std::rc::Rc;

use crate::diag::Diagnostic;

/// Kind of include directive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    /// Local include with quotes: #include "file.h"
    Local,
    /// System include with angles: #include <file.h>
    System,
}

/// Context handed to a custom include resolver.
#[derive(Clone, Debug, Default)]
pub struct IncludeContext {
    /// Stack of currently included files, innermost last.
    pub include_stack: Vec<String>,
    /// Configured include search directories, in order.
    pub include_dirs: Vec<PathBuf>,
    /// True for `#include_next`, which resumes the search after the
    /// directory where the current file was found.
    pub is_include_next: bool,
}

/// Type alias for include resolver function
pub type IncludeResolver = Rc<dyn Fn(&str, IncludeKind, &IncludeContext) -> Option<String>>;

/// Type alias for diagnostic handler function
pub type DiagnosticHandler = Rc<dyn Fn(&Diagnostic)>;

/// Language dialect driving directive acceptance, predefined macros, and the
/// minimum translation limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// K&R first-edition behavior, prior to any Standard.
    KAndR,
    /// Pre-Standard compilers with Reiser-model extensions.
    PreStandard,
    /// ISO C90 (with Amendment 1).
    C90,
    /// ISO C99.
    C99,
    /// C99 plus widely-implemented post-Standard extensions.
    PostStandard,
    /// ISO C++98.
    Cplusplus,
}

impl Dialect {
    /// Whether the dialect is one of the Standard-conforming modes.
    #[must_use]
    pub const fn is_standard(self) -> bool {
        !matches!(self, Dialect::KAndR | Dialect::PreStandard)
    }
}

/// Minimum translation limits the dialect's Standard requires an
/// implementation to support. Exceeding one is a portability warning;
/// the hard caps that abort the run live in [`Limits::INCLUDE_NEST_CAP`]
/// and [`Limits::COND_NEST_CAP`].
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Maximum string-literal length.
    pub string_len: usize,
    /// Maximum parameters in one macro definition.
    pub macro_params: usize,
    /// Maximum nesting of `#include`.
    pub include_nesting: usize,
    /// Maximum nesting of conditional directives.
    pub conditional_nesting: usize,
}

impl Limits {
    /// Hard cap on include nesting; exceeding it is fatal.
    pub const INCLUDE_NEST_CAP: usize = 256;
    /// Hard cap on conditional nesting; exceeding it is fatal.
    pub const COND_NEST_CAP: usize = 256;

    /// Translation limits guaranteed by the given dialect's Standard.
    /// The pre-Standard dialects use the C90 table.
    #[must_use]
    pub const fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::KAndR | Dialect::PreStandard | Dialect::C90 => Limits {
                string_len: 509,
                macro_params: 31,
                include_nesting: 8,
                conditional_nesting: 8,
            },
            Dialect::C99 => Limits {
                string_len: 4095,
                macro_params: 127,
                include_nesting: 15,
                conditional_nesting: 63,
            },
            Dialect::PostStandard | Dialect::Cplusplus => Limits {
                string_len: 65535,
                macro_params: 256,
                include_nesting: 256,
                conditional_nesting: 256,
            },
        }
    }
}

/// Where the quoted include form looks before the configured search list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchRule {
    /// The process current working directory.
    Current,
    /// The directory of the including source file.
    Source,
    /// Current working directory first, then the including file's directory.
    Both,
}

/// Configuration for the C preprocessor
#[derive(Clone)]
pub struct PreprocessorConfig {
    /// Language dialect.
    pub dialect: Dialect,
    /// Translation limits; defaults to the dialect's table.
    pub limits: Limits,
    /// Search policy for quoted includes.
    pub search_rule: SearchRule,
    /// Ordered include search directories.
    pub include_dirs: Vec<PathBuf>,
    /// Macros defined before the first line is read, as (name, definition)
    /// pairs where the definition may carry a parenthesized parameter list.
    pub predefines: Vec<(String, String)>,
    /// Macro names undefined before the first line is read.
    pub preundefines: Vec<String>,
    /// Bitmask of enabled warning classes, see [`crate::diag::warn_class`].
    pub warn_level: u32,
    /// Pass comments through instead of replacing them with a space.
    pub keep_comments: bool,
    /// Recognize trigraph sequences.
    pub trigraphs: bool,
    /// Recognize digraph spellings.
    pub digraphs: bool,
    /// Emit `#line` markers when the output position diverges from the
    /// source position.
    pub line_markers: bool,
    /// Maximum recursion depth for macro expansion
    pub recursion_limit: usize,
    /// Custom include file resolver function
    pub include_resolver: Option<IncludeResolver>,
    /// Optional handler invoked for every diagnostic as it is emitted
    pub diagnostic_handler: Option<DiagnosticHandler>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self::for_dialect(Dialect::C99)
    }
}

impl PreprocessorConfig {
    /// Create a configuration for the given dialect, with that dialect's
    /// limit table and character-set substitutions.
    #[must_use]
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            limits: Limits::for_dialect(dialect),
            search_rule: SearchRule::Current,
            include_dirs: Vec::new(),
            predefines: Vec::new(),
            preundefines: Vec::new(),
            warn_level: crate::diag::warn_class::COMMON,
            keep_comments: false,
            trigraphs: matches!(dialect, Dialect::C90 | Dialect::C99 | Dialect::Cplusplus),
            digraphs: matches!(
                dialect,
                Dialect::C99 | Dialect::PostStandard | Dialect::Cplusplus
            ),
            line_markers: false,
            recursion_limit: 128,
            include_resolver: None,
            diagnostic_handler: None,
        }
    }

    /// Add an include search directory.
    #[must_use]
    pub fn with_include_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Predefine a macro, as if by `#define name definition`.
    #[must_use]
    pub fn with_define<S: Into<String>>(mut self, name: S, definition: S) -> Self {
        self.predefines.push((name.into(), definition.into()));
        self
    }

    /// Undefine a macro before processing starts.
    #[must_use]
    pub fn with_undefine<S: Into<String>>(mut self, name: S) -> Self {
        self.preundefines.push(name.into());
        self
    }

    /// Set the quoted-include search policy.
    #[must_use]
    pub const fn with_search_rule(mut self, rule: SearchRule) -> Self {
        self.search_rule = rule;
        self
    }

    /// Set the warning-class bitmask.
    #[must_use]
    pub const fn with_warn_level(mut self, level: u32) -> Self {
        self.warn_level = level;
        self
    }

    /// Keep comments in the output instead of replacing them with a space.
    #[must_use]
    pub const fn with_keep_comments(mut self, keep: bool) -> Self {
        self.keep_comments = keep;
        self
    }

    /// Enable or disable `#line` re-synchronization markers in the output.
    #[must_use]
    pub const fn with_line_markers(mut self, enabled: bool) -> Self {
        self.line_markers = enabled;
        self
    }

    /// Override the dialect default for trigraph recognition.
    #[must_use]
    pub const fn with_trigraphs(mut self, enabled: bool) -> Self {
        self.trigraphs = enabled;
        self
    }

    /// Override the dialect default for digraph recognition.
    #[must_use]
    pub const fn with_digraphs(mut self, enabled: bool) -> Self {
        self.digraphs = enabled;
        self
    }

    /// Set a custom include resolver, bypassing the filesystem.
    #[must_use]
    pub fn with_include_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, IncludeKind, &IncludeContext) -> Option<String> + 'static,
    {
        self.include_resolver = Some(Rc::new(f));
        self
    }

    /// Set a handler invoked for every diagnostic as it is emitted.
    #[must_use]
    pub fn with_diagnostic_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&Diagnostic) + 'static,
    {
        self.diagnostic_handler = Some(Rc::new(f));
        self
    }
}
