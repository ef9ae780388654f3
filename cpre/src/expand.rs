use log::trace;

use crate::error::PreprocessError;
use crate::macro_def::{MacroDef, MacroKind, MagicMacro};
use crate::scanner::Scanner;
use crate::session::Session;
use crate::token::{Token, TokenKind};

/// Macro expander: rescans a token sequence, replacing macro references
/// until none remain expandable.
///
/// `active` is the stack of macro names currently mid-expansion. An
/// identifier naming an active macro is painted instead of expanded and
/// stays unexpandable for the rest of the rescan, which is what terminates
/// self-referential and mutually-recursive definitions.
pub(crate) struct Expander<'s> {
    session: &'s mut Session,
    active: Vec<String>,
}

impl<'s> Expander<'s> {
    pub(crate) fn new(session: &'s mut Session) -> Self {
        Expander {
            session,
            active: Vec::new(),
        }
    }

    /// Expand every macro reference in `tokens`.
    pub(crate) fn expand(&mut self, tokens: &[Token]) -> Result<Vec<Token>, PreprocessError> {
        self.expand_at(tokens, 0)
    }

    fn expand_at(&mut self, tokens: &[Token], depth: usize) -> Result<Vec<Token>, PreprocessError> {
        if depth > self.session.config.recursion_limit {
            return Err(PreprocessError::RecursionLimitExceeded(format!(
                "{} while rescanning macro replacement",
                self.session.position()
            )));
        }

        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if token.kind != TokenKind::Identifier || token.painted {
                out.push(token.clone());
                i += 1;
                continue;
            }
            if self.active.iter().any(|name| name == &token.text) {
                let mut painted = token.clone();
                painted.painted = true;
                out.push(painted);
                i += 1;
                continue;
            }
            let Some(def) = self.session.macros.get(&token.text) else {
                out.push(token.clone());
                i += 1;
                continue;
            };
            let def = def.clone();
            match &def.kind {
                MacroKind::Magic(MagicMacro::Pragma) => {
                    // Left for the driver, which rewrites _Pragma("...")
                    // into a #pragma line after expansion.
                    out.push(token.clone());
                    i += 1;
                }
                MacroKind::Magic(which) => {
                    out.push(self.session.magic_token(*which));
                    i += 1;
                }
                MacroKind::Object => {
                    trace!("expanding object-like macro {}", def.name);
                    let pasted = self.apply_paste(def.body.clone());
                    self.active.push(def.name.clone());
                    let expanded = self.expand_at(&pasted, depth + 1);
                    self.active.pop();
                    out.extend(expanded?);
                    i += 1;
                }
                MacroKind::Function { params, variadic } => {
                    i = self.expand_function_like(
                        &def, params, *variadic, tokens, i, depth, &mut out,
                    )?;
                }
            }
        }
        Ok(out)
    }

    /// Expand one function-like macro reference at `tokens[i]`. Returns the
    /// index scanning should resume from.
    #[allow(clippy::too_many_arguments)]
    fn expand_function_like(
        &mut self,
        def: &MacroDef,
        params: &[String],
        variadic: bool,
        tokens: &[Token],
        i: usize,
        depth: usize,
        out: &mut Vec<Token>,
    ) -> Result<usize, PreprocessError> {
        // A function-like macro name without a following ( is not a call.
        let Some(open) = next_non_ws(tokens, i + 1).filter(|&j| tokens[j].is_punct("(")) else {
            out.push(tokens[i].clone());
            return Ok(i + 1);
        };

        let Some((mut args, end)) = collect_args(tokens, open) else {
            self.session.error(format!(
                "unterminated argument list invoking macro \"{}\"",
                def.name
            ));
            let mut painted = tokens[i].clone();
            painted.painted = true;
            out.push(painted);
            return Ok(i + 1);
        };

        // () supplies zero arguments to a macro with no parameters.
        if args.len() == 1 && args[0].is_empty() && params.is_empty() {
            args.clear();
        }
        let arity_ok = if variadic {
            args.len() >= params.len()
        } else {
            args.len() == params.len()
        };
        if !arity_ok {
            self.session.error(format!(
                "macro \"{}\" requires {} argument(s), but {} given",
                def.name,
                params.len(),
                args.len()
            ));
            let mut painted = tokens[i].clone();
            painted.painted = true;
            out.push(painted);
            return Ok(i + 1);
        }

        trace!("expanding function-like macro {} with {} argument(s)", def.name, args.len());
        let substituted = self.substitute(def, params, variadic, &args, depth)?;
        let pasted = self.apply_paste(substituted);
        self.active.push(def.name.clone());
        let expanded = self.expand_at(&pasted, depth + 1);
        self.active.pop();
        out.extend(expanded?);
        Ok(end)
    }

    /// Replace parameter occurrences in the replacement list. Operands of
    /// `#` and `##` receive the raw argument spelling; every other
    /// occurrence receives the macro-expanded argument.
    fn substitute(
        &mut self,
        def: &MacroDef,
        params: &[String],
        variadic: bool,
        args: &[Vec<Token>],
        depth: usize,
    ) -> Result<Vec<Token>, PreprocessError> {
        let standard = self.session.config.dialect.is_standard();
        let body = &def.body;
        let mut out: Vec<Token> = Vec::with_capacity(body.len());
        let mut i = 0;
        while i < body.len() {
            let token = &body[i];
            if standard && token.is_punct("#") {
                if let Some(j) = next_non_ws(body, i + 1)
                    && body[j].kind == TokenKind::Identifier
                    && let Some(arg) = arg_for(&body[j].text, params, variadic, args)
                {
                    out.push(stringize(&arg));
                    i = j + 1;
                    continue;
                }
                out.push(token.clone());
                i += 1;
                continue;
            }
            if token.kind == TokenKind::Identifier
                && let Some(arg) = arg_for(&token.text, params, variadic, args)
            {
                let beside_paste = standard
                    && (next_non_ws(body, i + 1).is_some_and(|j| body[j].is_punct("##"))
                        || last_non_ws(&out).is_some_and(|t| t.is_punct("##")));
                if beside_paste {
                    out.extend(arg);
                } else {
                    out.extend(self.expand_at(&arg, depth + 1)?);
                }
                i += 1;
                continue;
            }
            out.push(token.clone());
            i += 1;
        }
        Ok(out)
    }

    /// Concatenate the operands of each `##` and re-tokenize the result,
    /// which must form exactly one token. The `##` of a replacement list is
    /// consumed either way; pre-Standard dialects have no paste operator and
    /// keep `##` literal.
    fn apply_paste(&mut self, tokens: Vec<Token>) -> Vec<Token> {
        if !self.session.config.dialect.is_standard()
            || !tokens.iter().any(|t| t.is_punct("##"))
        {
            return tokens;
        }
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if !tokens[i].is_punct("##") {
                out.push(tokens[i].clone());
                i += 1;
                continue;
            }
            while out.last().is_some_and(Token::is_whitespace) {
                out.pop();
            }
            let left = out.pop();
            let right_idx = next_non_ws(&tokens, i + 1);
            let right = right_idx.map(|j| tokens[j].clone());
            match (left, right) {
                (Some(l), Some(r)) => {
                    let combined = format!("{}{}", l.text, r.text);
                    let retok = Scanner::tokenize_line(&combined);
                    if retok.len() == 1 && !retok[0].is_whitespace() {
                        out.push(retok[0].clone());
                    } else {
                        self.session.error(format!(
                            "pasting \"{}\" and \"{}\" does not give a valid token",
                            l.text, r.text
                        ));
                        out.push(l);
                        out.push(r);
                    }
                }
                // An absent operand leaves the other one as the result.
                (Some(l), None) => out.push(l),
                (None, Some(r)) => out.push(r),
                (None, None) => {}
            }
            i = right_idx.map_or(tokens.len(), |j| j + 1);
        }
        out
    }
}

/// Argument bound to a parameter name, `__VA_ARGS__` collecting the
/// trailing arguments of a variadic call.
fn arg_for(
    name: &str,
    params: &[String],
    variadic: bool,
    args: &[Vec<Token>],
) -> Option<Vec<Token>> {
    if let Some(pos) = params.iter().position(|p| p == name) {
        return Some(args[pos].clone());
    }
    if variadic && name == "__VA_ARGS__" {
        let mut joined: Vec<Token> = Vec::new();
        for (k, arg) in args[params.len()..].iter().enumerate() {
            if k > 0 {
                joined.push(Token::punct(","));
                joined.push(Token::space());
            }
            joined.extend(arg.iter().cloned());
        }
        return Some(joined);
    }
    None
}

/// Collect the arguments of a call whose `(` sits at `tokens[open]`.
/// Top-level commas split; commas inside nested parentheses belong to the
/// inner argument. Returns the arguments and the index after the closing
/// `)`, or None when the list never closes.
fn collect_args(tokens: &[Token], open: usize) -> Option<(Vec<Vec<Token>>, usize)> {
    let mut args: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut parens = 1usize;
    let mut i = open + 1;
    while i < tokens.len() {
        let t = &tokens[i];
        if t.is_punct("(") {
            parens += 1;
            current.push(t.clone());
        } else if t.is_punct(")") {
            parens -= 1;
            if parens == 0 {
                args.push(Scanner::trim_token_whitespace(current));
                return Some((args, i + 1));
            }
            current.push(t.clone());
        } else if t.is_punct(",") && parens == 1 {
            args.push(Scanner::trim_token_whitespace(current));
            current = Vec::new();
        } else {
            current.push(t.clone());
        }
        i += 1;
    }
    None
}

/// Stringize a raw argument: interior whitespace runs collapse to one
/// space and every quote and backslash is escaped.
fn stringize(arg: &[Token]) -> Token {
    let mut spelling = String::new();
    for t in arg {
        if t.is_whitespace() {
            spelling.push(' ');
        } else {
            spelling.push_str(&t.text);
        }
    }
    let escaped = crate::session::escape_string_body(&spelling);
    Token::new(TokenKind::StringLit, format!("\"{escaped}\""))
}

fn next_non_ws(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&j| !tokens[j].is_whitespace())
}

fn last_non_ws(tokens: &[Token]) -> Option<&Token> {
    tokens.iter().rev().find(|t| !t.is_whitespace())
}
