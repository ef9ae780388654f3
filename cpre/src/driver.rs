use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::config::{IncludeContext, IncludeKind, Limits, PreprocessorConfig};
use crate::diag::{Diagnostic, warn_class};
use crate::error::PreprocessError;
use crate::expand::Expander;
use crate::include;
use crate::macro_def::{MacroDef, MacroKind};
use crate::macro_table::PushPopOutcome;
use crate::scanner::Scanner;
use crate::session::{CondFrame, CondKind, IncludeFrame, Session};
use crate::token::{Token, TokenKind, is_identifier_continue, is_identifier_start};

/// The preprocessor: directive dispatch and output assembly over one
/// [`Session`] of state.
pub struct Preprocessor {
    session: Session,
    /// File and line the next emitted output line corresponds to, for
    /// `#line` re-synchronization markers.
    out_file: String,
    out_line: usize,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    /// Create a preprocessor with the default (C99) configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PreprocessorConfig::default())
    }

    /// Create a preprocessor with the given configuration, applying its
    /// predefinitions.
    #[must_use]
    pub fn with_config(config: PreprocessorConfig) -> Self {
        let mut pp = Preprocessor {
            session: Session::new(config),
            out_file: String::new(),
            out_line: 1,
        };
        pp.apply_predefines();
        pp
    }

    fn apply_predefines(&mut self) {
        let predefines = self.session.config.predefines.clone();
        for (signature, body) in &predefines {
            self.define(signature, body);
        }
        let preundefines = self.session.config.preundefines.clone();
        for name in &preundefines {
            self.session.macros.undef(name);
        }
    }

    /// Restore the post-configuration initial state, as required for
    /// running several independent passes in one process.
    pub fn reset(&mut self) {
        self.session.reset();
        self.apply_predefines();
        self.out_file.clear();
        self.out_line = 1;
    }

    /// Set the name reported for the primary input, used by `__FILE__` and
    /// diagnostics.
    pub fn set_current_file<S: Into<String>>(&mut self, file: S) {
        self.session.current_file = file.into();
    }

    /// Define a macro as if by `#define`. The signature is the macro name,
    /// optionally followed immediately by a parenthesized parameter list:
    /// `"MAX(a, b)"`.
    pub fn define(&mut self, signature: &str, body: &str) {
        let line = format!("{} {}", signature.trim(), body);
        self.define_from_line(&line, false);
    }

    /// Remove a macro definition.
    pub fn undef(&mut self, name: &str) {
        self.session.macros.undef(name);
    }

    /// Check if a macro is defined
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.session.macros.is_defined(name)
    }

    /// Diagnostics collected so far, in emission order.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.session.diagnostics
    }

    /// Number of recoverable errors reported so far.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.session.error_count
    }

    /// Files opened via `#include`, in first-open order, for an external
    /// dependency writer.
    #[must_use]
    pub fn dependencies(&self) -> &[PathBuf] {
        &self.session.dependencies
    }

    /// Preprocess the input and return the expanded text.
    ///
    /// Recoverable problems are collected as [`Diagnostic`]s; only fatal
    /// conditions abort with an error.
    ///
    /// # Errors
    /// Returns `PreprocessError` when include or conditional nesting
    /// exceeds the hard cap, macro rescanning exceeds the recursion limit,
    /// or an included file cannot be read.
    pub fn process(&mut self, input: &str) -> Result<String, PreprocessError> {
        self.session.cond_stack.clear();
        self.session.include_stack.clear();
        self.session.current_line = 1;
        self.out_file = self.session.current_file.clone();
        self.out_line = 1;

        let text = self.prepare_text(input);
        let mut out_lines: Vec<String> = Vec::new();
        self.process_chunk(&text, &mut out_lines)?;

        if let Some(frame) = self.session.cond_stack.last() {
            let opened_by = frame.kind.directive_name();
            self.session
                .error(format!("unterminated {opened_by} section at end of input"));
            self.session.cond_stack.clear();
        }
        Ok(out_lines.join("\n"))
    }

    /// Preprocess a file, reporting positions against its path.
    ///
    /// # Errors
    /// Returns `PreprocessError` if the file cannot be read or a fatal
    /// condition arises while preprocessing, see [`process`].
    ///
    /// [`process`]: Preprocessor::process
    pub fn process_file<P: AsRef<Path>>(&mut self, path: P) -> Result<String, PreprocessError> {
        let input = std::fs::read_to_string(path.as_ref())?;
        self.set_current_file(path.as_ref().display().to_string());
        self.session.current_dir_index = None;
        self.process(&input)
    }

    /// Run the early translation phases: trigraph substitution, line
    /// splicing, and comment removal.
    fn prepare_text(&mut self, input: &str) -> String {
        let text = if self.session.config.trigraphs {
            Scanner::replace_trigraphs(input)
        } else {
            input.to_string()
        };
        let text = Scanner::line_splice(&text);
        let (text, unterminated) =
            Scanner::strip_comments(&text, self.session.config.keep_comments);
        if let Some(start_line) = unterminated {
            let saved = self.session.current_line;
            self.session.current_line = start_line;
            self.session.error("unterminated block comment");
            self.session.current_line = saved;
        }
        text
    }

    /// Process the prepared text of one file. Reused for every include;
    /// the caller manages the file-stack frame around it.
    fn process_chunk(
        &mut self,
        text: &str,
        out: &mut Vec<String>,
    ) -> Result<(), PreprocessError> {
        let mut lines: Vec<&str> = text.split('\n').collect();
        if lines.last() == Some(&"") {
            lines.pop();
        }
        self.session.current_line = 1;

        let mut idx = 0;
        while idx < lines.len() {
            let raw = lines[idx];
            idx += 1;
            let line = if self.session.config.digraphs {
                Scanner::replace_digraphs(raw)
            } else {
                raw.to_string()
            };

            if let Some(directive) = extract_directive(&line) {
                self.handle_directive(directive, &line, out)?;
            } else if self.can_emit() {
                // A function-like invocation may continue on later lines;
                // join them until the parentheses balance.
                let mut logical = line;
                let mut tokens = Scanner::tokenize_line_checked(&logical);
                let mut extra_lines = 0usize;
                while self.line_may_continue(&tokens.0)
                    && idx < lines.len()
                    && extract_directive(lines[idx]).is_none()
                {
                    logical.push(' ');
                    logical.push_str(lines[idx]);
                    idx += 1;
                    extra_lines += 1;
                    tokens = Scanner::tokenize_line_checked(&logical);
                }
                let (tokens, unterminated) = tokens;
                if let Some(what) = unterminated {
                    self.session.error(format!("unterminated {what}"));
                }
                self.check_literal_limits(&tokens);
                let expanded = Expander::new(&mut self.session).expand(&tokens)?;
                let reconstructed = Scanner::tokens_to_string(&expanded);
                self.emit_expanded(reconstructed, out)?;
                self.session.current_line += extra_lines;
            }
            self.session.current_line += 1;
        }
        Ok(())
    }

    /// Emit one expanded text line, executing any `_Pragma` operator the
    /// expansion produced.
    fn emit_expanded(
        &mut self,
        text: String,
        out: &mut Vec<String>,
    ) -> Result<(), PreprocessError> {
        if text.contains("_Pragma") {
            let rewritten = Scanner::process_pragma_operator(&text);
            if let Some(rest) = rewritten.trim_start().strip_prefix("#pragma") {
                let rest = rest.trim_start().to_string();
                self.handle_pragma(&rest, &rewritten, out)?;
                return Ok(());
            }
            self.emit_line(rewritten, out);
            return Ok(());
        }
        self.emit_line(text, out);
        Ok(())
    }

    /// Emit an output line, first re-synchronizing the implied position
    /// with the source position when markers are enabled. Short gaps are
    /// bridged with blank lines, longer jumps with a `#line` marker.
    fn emit_line(&mut self, text: String, out: &mut Vec<String>) {
        if self.session.config.line_markers {
            let file = self.session.current_file.clone();
            let line = self.session.current_line;
            if self.out_file != file {
                out.push(format!(
                    "#line {} \"{}\"",
                    line,
                    crate::session::escape_string_body(&file)
                ));
                self.out_file = file;
            } else if self.out_line != line {
                match line.checked_sub(self.out_line) {
                    Some(gap) if gap <= 7 => {
                        for _ in 0..gap {
                            out.push(String::new());
                        }
                    }
                    _ => out.push(format!(
                        "#line {} \"{}\"",
                        line,
                        crate::session::escape_string_body(&file)
                    )),
                }
            }
            self.out_line = line + 1;
        }
        out.push(text);
    }

    /// True while every enclosing conditional branch is being compiled.
    fn can_emit(&self) -> bool {
        self.session.cond_stack.iter().all(|frame| frame.active)
    }

    fn line_may_continue(&self, tokens: &[Token]) -> bool {
        Scanner::paren_balance(tokens) > 0
            && tokens.iter().any(|t| {
                t.kind == TokenKind::Identifier
                    && self
                        .session
                        .macros
                        .get(&t.text)
                        .is_some_and(|def| matches!(def.kind, MacroKind::Function { .. }))
            })
    }

    fn check_literal_limits(&mut self, tokens: &[Token]) {
        let limit = self.session.config.limits.string_len;
        for t in tokens {
            if matches!(t.kind, TokenKind::StringLit | TokenKind::CharLit)
                && t.text.len() > limit + 2
            {
                self.session.warn(
                    warn_class::PORTABILITY,
                    format!("quoted literal longer than the {limit}-byte translation limit"),
                );
            }
        }
    }

    fn handle_directive(
        &mut self,
        directive: &str,
        full_line: &str,
        out: &mut Vec<String>,
    ) -> Result<(), PreprocessError> {
        let mut parts = directive.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or("").trim();
        let rest = parts.next().unwrap_or("").trim();

        match cmd {
            // The null directive is accepted and ignored.
            "" => Ok(()),
            "define" => {
                if self.can_emit() {
                    self.define_from_line(rest, true);
                }
                Ok(())
            }
            "undef" => {
                if self.can_emit() {
                    self.handle_undef(rest);
                }
                Ok(())
            }
            "include" => self.handle_include(rest, false, out),
            "include_next" => self.handle_include(rest, true, out),
            "if" => self.handle_if(rest, CondKind::If),
            "ifdef" => self.handle_if(rest, CondKind::Ifdef),
            "ifndef" => self.handle_if(rest, CondKind::Ifndef),
            "elif" => self.handle_elif(rest),
            "else" => {
                self.handle_else(rest);
                Ok(())
            }
            "endif" => {
                self.handle_endif(rest);
                Ok(())
            }
            "line" => {
                if self.can_emit() {
                    self.handle_line(rest)?;
                }
                Ok(())
            }
            "error" => {
                if self.can_emit() {
                    self.session.error(if rest.is_empty() {
                        "#error".to_string()
                    } else {
                        format!("#error: {rest}")
                    });
                }
                Ok(())
            }
            "warning" => {
                if self.can_emit() {
                    self.session.warn(
                        warn_class::COMMON,
                        if rest.is_empty() {
                            "#warning".to_string()
                        } else {
                            format!("#warning: {rest}")
                        },
                    );
                }
                Ok(())
            }
            "pragma" => {
                if self.can_emit() {
                    self.handle_pragma(rest, full_line, out)?;
                }
                Ok(())
            }
            // `# 123 "file"` is an accepted spelling of #line.
            _ if cmd.chars().all(|c| c.is_ascii_digit()) => {
                if self.can_emit() {
                    self.handle_line(directive)?;
                }
                Ok(())
            }
            _ => {
                if !self.can_emit() {
                    return Ok(());
                }
                if self.session.config.dialect.is_standard() {
                    self.session.error(format!("unknown directive #{cmd}"));
                } else {
                    // Old dialects pass unrecognized directives through.
                    self.emit_line(full_line.to_string(), out);
                }
                Ok(())
            }
        }
    }

    /// Parse and install a `#define`. `located` marks directive-sourced
    /// definitions, which record their provenance for redefinition
    /// diagnostics; configuration-supplied definitions carry none.
    fn define_from_line(&mut self, rest: &str, located: bool) {
        let rest = rest.trim_start();
        let chars: Vec<char> = rest.chars().collect();
        let mut i = 0;
        while i < chars.len() && is_identifier_continue(chars[i]) {
            i += 1;
        }
        if i == 0 || !is_identifier_start(chars[0]) {
            self.session.error("no macro name given in #define");
            return;
        }
        let name: String = chars[..i].iter().collect();
        if name == "defined" {
            self.session.error("\"defined\" cannot be used as a macro name");
            return;
        }

        // A parameter list must follow the name with no whitespace between.
        let (params, variadic, body_start) = if chars.get(i) == Some(&'(') {
            match parse_parameter_list(&chars, i + 1) {
                Some((params, variadic, after)) => (Some(params), variadic, after),
                None => {
                    self.session
                        .error(format!("malformed parameter list for macro \"{name}\""));
                    return;
                }
            }
        } else {
            (None, false, i)
        };

        if let Some(params) = &params {
            if params.len() > self.session.config.limits.macro_params {
                self.session.warn(
                    warn_class::PORTABILITY,
                    format!(
                        "more than {} parameters for macro \"{}\"",
                        self.session.config.limits.macro_params, name
                    ),
                );
            }
            for (k, p) in params.iter().enumerate() {
                if params[..k].contains(p) {
                    self.session
                        .error(format!("duplicate macro parameter \"{p}\""));
                    return;
                }
            }
        }
        if variadic {
            match self.session.config.dialect {
                crate::config::Dialect::KAndR | crate::config::Dialect::PreStandard => {
                    self.session
                        .error("variadic macros are not supported in this mode");
                    return;
                }
                crate::config::Dialect::C90 => {
                    self.session.warn(
                        warn_class::PORTABILITY,
                        "variadic macros are a C99 feature",
                    );
                }
                _ => {}
            }
        }

        let body_str: String = chars[body_start..].iter().collect();
        let body = Scanner::trim_token_whitespace(Scanner::tokenize_line(body_str.trim()));
        let mut def = match params {
            Some(params) => MacroDef::function(name.clone(), params, variadic, body),
            None => MacroDef::object(name.clone(), body),
        };
        if located {
            let file = self.session.current_file.clone();
            def = def.at(&file, self.session.current_line);
        }

        let previous = self.session.macros.get(&name).map(|prev| {
            (
                matches!(prev.kind, MacroKind::Magic(_)),
                prev.same_definition(&def),
                prev.location.clone(),
            )
        });
        if let Some((is_magic, same, location)) = previous {
            if is_magic {
                self.session.warn(
                    warn_class::COMMON,
                    format!("\"{name}\" is a predefined macro and cannot be redefined"),
                );
                return;
            }
            if !same {
                let provenance = location
                    .map(|(f, l)| format!(" (previously defined at {f}:{l})"))
                    .unwrap_or_default();
                self.session.warn(
                    warn_class::COMMON,
                    format!("macro \"{name}\" redefined incompatibly{provenance}"),
                );
            }
        }
        trace!("defined macro {name}");
        self.session.macros.define(def);
    }

    fn handle_undef(&mut self, rest: &str) {
        let name = rest.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            self.session.error("no macro name given in #undef");
            return;
        }
        if rest.split_whitespace().nth(1).is_some() {
            self.session
                .warn(warn_class::COMMON, "extra tokens after #undef name");
        }
        let is_magic = self
            .session
            .macros
            .get(name)
            .is_some_and(|def| matches!(def.kind, MacroKind::Magic(_)));
        if is_magic {
            self.session.warn(
                warn_class::COMMON,
                format!("\"{name}\" is a predefined macro and cannot be undefined"),
            );
            return;
        }
        if !self.session.macros.undef(name) {
            self.session.warn(
                warn_class::COMMON,
                format!("\"{name}\" has not been defined"),
            );
        }
    }

    fn handle_if(&mut self, rest: &str, kind: CondKind) -> Result<(), PreprocessError> {
        if self.session.cond_stack.len() >= Limits::COND_NEST_CAP {
            return Err(PreprocessError::ConditionalNestingTooDeep(
                self.session.position(),
            ));
        }
        if self.session.cond_stack.len() >= self.session.config.limits.conditional_nesting {
            let limit = self.session.config.limits.conditional_nesting;
            self.session.warn(
                warn_class::PORTABILITY,
                format!("more than {limit} nested conditional sections"),
            );
        }

        let parent_active = self.can_emit();
        // Groups inside a skipped region are tracked but never evaluated.
        let taken = if !parent_active {
            false
        } else {
            match kind {
                CondKind::If => self.eval_condition(rest)?,
                CondKind::Ifdef | CondKind::Ifndef => {
                    let name = rest.split_whitespace().next().unwrap_or("");
                    if name.is_empty() {
                        self.session.error("no macro name given in conditional");
                        false
                    } else {
                        let defined = self.session.macros.is_defined(name);
                        if kind == CondKind::Ifdef { defined } else { !defined }
                    }
                }
            }
        };
        self.session
            .cond_stack
            .push(CondFrame::new(kind, parent_active, taken));
        Ok(())
    }

    fn handle_elif(&mut self, rest: &str) -> Result<(), PreprocessError> {
        let Some(frame) = self.session.cond_stack.last() else {
            self.session.error("#elif without #if");
            return Ok(());
        };
        let (parent_active, any_taken, seen_else) =
            (frame.parent_active, frame.any_taken, frame.seen_else);
        if seen_else {
            self.session.error("#elif after #else");
            return Ok(());
        }
        // After a taken branch the expression is skipped, not evaluated.
        let value = if parent_active && !any_taken {
            self.eval_condition(rest)?
        } else {
            false
        };
        if let Some(frame) = self.session.cond_stack.last_mut() {
            frame.active = value;
            frame.any_taken |= value;
        }
        Ok(())
    }

    fn handle_else(&mut self, rest: &str) {
        if !rest.is_empty() {
            self.session
                .warn(warn_class::COMMON, "extra tokens after #else");
        }
        let Some(frame) = self.session.cond_stack.last() else {
            self.session.error("#else without #if");
            return;
        };
        let (parent_active, any_taken, seen_else) =
            (frame.parent_active, frame.any_taken, frame.seen_else);
        if seen_else {
            self.session.error("#else after #else");
            return;
        }
        let active = parent_active && !any_taken;
        if let Some(frame) = self.session.cond_stack.last_mut() {
            frame.active = active;
            frame.any_taken = true;
            frame.seen_else = true;
        }
    }

    fn handle_endif(&mut self, rest: &str) {
        if !rest.is_empty() {
            self.session
                .warn(warn_class::COMMON, "extra tokens after #endif");
        }
        let base = self
            .session
            .include_stack
            .last()
            .map_or(0, |frame| frame.cond_base);
        if self.session.cond_stack.len() <= base {
            self.session.error("#endif without #if");
            return;
        }
        self.session.cond_stack.pop();
    }

    /// Evaluate a `#if`/`#elif` controlling expression. `defined` queries
    /// are resolved before macro expansion so their operands are never
    /// expanded; identifiers surviving expansion evaluate to zero.
    fn eval_condition(&mut self, expr: &str) -> Result<bool, PreprocessError> {
        let tokens = Scanner::tokenize_line(expr);
        let Some(resolved) = self.resolve_defined(&tokens) else {
            return Ok(false);
        };
        let expanded = Expander::new(&mut self.session).expand(&resolved)?;
        let text = Scanner::tokens_to_string(&expanded);

        let expr_tokens = match crate::expr::ExprParser::tokenize(&text) {
            Ok(t) => t,
            Err(message) => {
                self.session.error(format!("#if expression: {message}"));
                return Ok(false);
            }
        };
        match crate::expr::ExprParser::evaluate(&expr_tokens) {
            Ok(outcome) => {
                if outcome.div_by_zero {
                    self.session.error("division by zero in #if expression");
                }
                Ok(outcome.value != 0)
            }
            Err(message) => {
                self.session.error(format!("#if expression: {message}"));
                Ok(false)
            }
        }
    }

    /// Replace `defined NAME` / `defined(NAME)` with 1 or 0. Returns None
    /// after diagnosing a malformed query.
    fn resolve_defined(&mut self, tokens: &[Token]) -> Option<Vec<Token>> {
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let t = &tokens[i];
            if t.kind != TokenKind::Identifier || t.text != "defined" {
                out.push(t.clone());
                i += 1;
                continue;
            }
            let mut j = i + 1;
            while j < tokens.len() && tokens[j].is_whitespace() {
                j += 1;
            }
            let (name, end) = if j < tokens.len() && tokens[j].is_punct("(") {
                let mut k = j + 1;
                while k < tokens.len() && tokens[k].is_whitespace() {
                    k += 1;
                }
                if k >= tokens.len() || tokens[k].kind != TokenKind::Identifier {
                    self.session
                        .error("identifier expected after \"defined(\"");
                    return None;
                }
                let name = tokens[k].text.clone();
                let mut m = k + 1;
                while m < tokens.len() && tokens[m].is_whitespace() {
                    m += 1;
                }
                if m >= tokens.len() || !tokens[m].is_punct(")") {
                    self.session.error("\")\" expected in \"defined\" query");
                    return None;
                }
                (name, m + 1)
            } else if j < tokens.len() && tokens[j].kind == TokenKind::Identifier {
                (tokens[j].text.clone(), j + 1)
            } else {
                self.session
                    .error("identifier expected after \"defined\"");
                return None;
            };
            let value = if self.session.macros.is_defined(&name) {
                "1"
            } else {
                "0"
            };
            out.push(Token::new(TokenKind::Number, value));
            i = end;
        }
        Some(out)
    }

    fn handle_line(&mut self, rest: &str) -> Result<(), PreprocessError> {
        let tokens = Scanner::tokenize_line(rest);
        let expanded = Expander::new(&mut self.session).expand(&tokens)?;
        let text = Scanner::tokens_to_string(&expanded);
        let mut parts = text.split_whitespace();
        let Some(number) = parts.next().and_then(|n| n.parse::<usize>().ok()) else {
            self.session.error("malformed #line directive");
            return Ok(());
        };
        // The next physical line gets the requested number.
        self.session.current_line = number.saturating_sub(1);
        if let Some(name) = parts.next() {
            let name = name
                .strip_prefix('"')
                .and_then(|n| n.strip_suffix('"'))
                .unwrap_or(name);
            self.session.current_file = name.to_string();
        }
        Ok(())
    }

    fn handle_include(
        &mut self,
        rest: &str,
        is_next: bool,
        out: &mut Vec<String>,
    ) -> Result<(), PreprocessError> {
        if !self.can_emit() {
            return Ok(());
        }
        let spec = rest.trim();
        // A computed include is macro-expanded before the header name is read.
        let spec = if spec.starts_with('"') || spec.starts_with('<') {
            spec.to_string()
        } else {
            let tokens = Scanner::tokenize_line(spec);
            let expanded = Expander::new(&mut self.session).expand(&tokens)?;
            Scanner::tokens_to_string(&expanded).trim().to_string()
        };
        let Some((name, kind)) = parse_header_name(&spec) else {
            self.session.error("malformed #include directive");
            return Ok(());
        };

        if self.session.include_stack.len() >= Limits::INCLUDE_NEST_CAP {
            return Err(PreprocessError::IncludeNestingTooDeep(
                self.session.position(),
            ));
        }
        if self.session.include_stack.len() >= self.session.config.limits.include_nesting {
            let limit = self.session.config.limits.include_nesting;
            self.session.warn(
                warn_class::PORTABILITY,
                format!("more than {limit} nested includes"),
            );
        }

        let opened = self.open_include(&name, kind, is_next)?;
        let Some((key, content, dir_index)) = opened else {
            self.session
                .error(format!("include file \"{name}\" not found"));
            return Ok(());
        };
        if self.session.once_included.contains(&key) {
            debug!("skipping once-included {}", key.display());
            return Ok(());
        }
        self.session.record_dependency(&key);

        debug!("entering include {}", key.display());
        self.session.include_stack.push(IncludeFrame {
            file: self.session.current_file.clone(),
            line: self.session.current_line,
            dir_index: self.session.current_dir_index,
            cond_base: self.session.cond_stack.len(),
        });
        self.session.current_file = key.display().to_string();
        self.session.current_dir_index = dir_index;

        let text = self.prepare_text(&content);
        let result = self.process_chunk(&text, out);

        let frame = self.session.include_stack.pop();
        if let Some(frame) = frame {
            if self.session.cond_stack.len() > frame.cond_base {
                self.session
                    .error("unterminated #if section in included file");
                self.session.cond_stack.truncate(frame.cond_base);
            }
            self.session.current_file = frame.file;
            self.session.current_line = frame.line;
            self.session.current_dir_index = frame.dir_index;
        }
        result
    }

    /// Locate and read an include file, through the configured resolver or
    /// the filesystem. Returns the once-set key, the content, and the
    /// search-directory index the file was found at.
    #[allow(clippy::type_complexity)]
    fn open_include(
        &mut self,
        name: &str,
        kind: IncludeKind,
        is_next: bool,
    ) -> Result<Option<(PathBuf, String, Option<usize>)>, PreprocessError> {
        if let Some(resolver) = self.session.config.include_resolver.clone() {
            let context = IncludeContext {
                include_stack: self
                    .session
                    .include_stack
                    .iter()
                    .map(|f| f.file.clone())
                    .collect(),
                include_dirs: self.session.config.include_dirs.clone(),
                is_include_next: is_next,
            };
            let Some(content) = resolver(name, kind, &context) else {
                return Ok(None);
            };
            return Ok(Some((include::clean_path(Path::new(name)), content, None)));
        }

        let includer_dir = Path::new(&self.session.current_file)
            .parent()
            .map(Path::to_path_buf);
        let next_after = is_next.then_some(self.session.current_dir_index);
        let Some(resolved) = include::resolve(
            name,
            kind,
            self.session.config.search_rule,
            &self.session.config.include_dirs,
            includer_dir.as_deref(),
            next_after,
        ) else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(&resolved.path)?;
        Ok(Some((resolved.path, content, resolved.dir_index)))
    }

    fn handle_pragma(
        &mut self,
        rest: &str,
        full_line: &str,
        out: &mut Vec<String>,
    ) -> Result<(), PreprocessError> {
        let trimmed = rest.trim();
        // Vendor-namespaced spelling of the same sub-directives.
        let (sub, namespaced) = match trimmed.strip_prefix("MCPP") {
            Some(tail) if tail.starts_with(char::is_whitespace) => (tail.trim_start(), true),
            _ => (trimmed, false),
        };

        if sub == "once" {
            // Filesystem includes track a canonical path, resolver includes
            // a lexically cleaned name; either way the current file string
            // already matches the key checked before opening.
            let key = include::clean_path(Path::new(&self.session.current_file));
            self.session.once_included.insert(key);
            return Ok(());
        }
        if let Some(tail) = sub.strip_prefix("push_macro") {
            self.handle_push_pop(tail, true);
            return Ok(());
        }
        if let Some(tail) = sub.strip_prefix("pop_macro") {
            self.handle_push_pop(tail, false);
            return Ok(());
        }

        let word = sub.split_whitespace().next().unwrap_or("");
        self.session
            .warn(warn_class::COMMON, format!("unknown #pragma {word}"));
        if !namespaced {
            // Unknown pragmas are addressed to the compiler; keep them.
            self.emit_line(full_line.to_string(), out);
        }
        Ok(())
    }

    /// `push_macro("NAME")` / `pop_macro("NAME")`.
    fn handle_push_pop(&mut self, args: &str, is_push: bool) {
        let direction = if is_push { "push_macro" } else { "pop_macro" };
        let Some(name) = parse_quoted_name(args) else {
            self.session
                .warn(warn_class::COMMON, format!("bad {direction} syntax"));
            return;
        };
        let outcome = if is_push {
            self.session.macros.push(&name)
        } else {
            self.session.macros.pop(&name)
        };
        match outcome {
            PushPopOutcome::Done => {}
            PushPopOutcome::AlreadyPushed => {
                self.session
                    .warn(warn_class::COMMON, format!("\"{name}\" is already pushed"));
            }
            PushPopOutcome::NotPushed => {
                self.session.warn(
                    warn_class::COMMON,
                    format!("\"{name}\" has not been pushed"),
                );
            }
            PushPopOutcome::NotDefined => {
                self.session.warn(
                    warn_class::COMMON,
                    format!("\"{name}\" has not been defined"),
                );
            }
        }
    }
}

fn extract_directive(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    trimmed.strip_prefix('#').map(str::trim)
}

/// Parse `"name"` or `<name>`.
fn parse_header_name(spec: &str) -> Option<(String, IncludeKind)> {
    if spec.len() >= 2 && spec.starts_with('"') && spec.ends_with('"') {
        return Some((spec[1..spec.len() - 1].to_string(), IncludeKind::Local));
    }
    if spec.len() >= 2 && spec.starts_with('<') && spec.ends_with('>') {
        return Some((spec[1..spec.len() - 1].to_string(), IncludeKind::System));
    }
    None
}

/// Parse `( "NAME" )` for push_macro/pop_macro.
fn parse_quoted_name(args: &str) -> Option<String> {
    let args = args.trim();
    let inner = args.strip_prefix('(')?.strip_suffix(')')?.trim();
    let name = inner.strip_prefix('"')?.strip_suffix('"')?;
    if !name.is_empty() && name.chars().all(is_identifier_continue) {
        Some(name.to_string())
    } else {
        None
    }
}

/// Parse the parameter list of a function-like definition, starting just
/// after the opening parenthesis. Returns the names, the variadic flag,
/// and the index after the closing parenthesis.
fn parse_parameter_list(chars: &[char], mut i: usize) -> Option<(Vec<String>, bool, usize)> {
    let mut params = Vec::new();
    let mut variadic = false;
    loop {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            return None;
        }
        if chars[i] == ')' {
            if params.is_empty() && !variadic {
                return Some((params, false, i + 1));
            }
            return None; // trailing comma
        }
        if chars[i..].starts_with(&['.', '.', '.']) {
            variadic = true;
            i += 3;
        } else if is_identifier_start(chars[i]) {
            let start = i;
            while i < chars.len() && is_identifier_continue(chars[i]) {
                i += 1;
            }
            params.push(chars[start..i].iter().collect());
        } else {
            return None;
        }
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        match chars.get(i) {
            Some(')') => return Some((params, variadic, i + 1)),
            // Nothing may follow `...`.
            Some(',') if !variadic => i += 1,
            _ => return None,
        }
    }
}
