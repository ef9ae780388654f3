use log::trace;

use crate::token::{Token, TokenKind, is_identifier_continue, is_identifier_start};

/// Pure tokenization logic, stateless.
///
/// Everything here transforms text or token sequences without touching
/// session state, so the routines can be tested in isolation and reused by
/// the expander (argument re-tokenization, paste validation).
pub(crate) struct Scanner;

/// Three-character punctuators, matched before the two-character table.
const PUNCT3: [&str; 3] = ["<<=", ">>=", "..."];

/// Two-character punctuators.
const PUNCT2: [&str; 20] = [
    "##", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "->", "++", "--", "+=", "-=", "*=",
    "/=", "%=", "&=", "^=", "|=",
];

impl Scanner {
    /// Replace trigraph sequences (`??=` and friends) with the characters
    /// they denote. Applied to the whole input, including literals, as the
    /// first translation phase.
    pub(crate) fn replace_trigraphs(input: &str) -> String {
        if !input.contains("??") {
            return input.to_string();
        }
        let chars: Vec<char> = input.chars().collect();
        let mut out = String::with_capacity(input.len());
        let mut i = 0;
        while i < chars.len() {
            if i + 2 < chars.len() && chars[i] == '?' && chars[i + 1] == '?' {
                let replacement = match chars[i + 2] {
                    '=' => Some('#'),
                    '(' => Some('['),
                    '/' => Some('\\'),
                    ')' => Some(']'),
                    '\'' => Some('^'),
                    '<' => Some('{'),
                    '!' => Some('|'),
                    '>' => Some('}'),
                    '-' => Some('~'),
                    _ => None,
                };
                if let Some(c) = replacement {
                    out.push(c);
                    i += 3;
                    continue;
                }
            }
            out.push(chars[i]);
            i += 1;
        }
        out
    }

    /// Join lines ending with a backslash. The deleted newlines are re-emitted
    /// after the logical line ends so that physical line numbering is
    /// preserved for `__LINE__` and diagnostics.
    pub(crate) fn line_splice(input: &str) -> String {
        if !input.contains('\\') {
            return input.to_string();
        }

        let mut out = String::with_capacity(input.len());
        let mut pending_newlines = 0usize;
        let mut chars = input.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                match chars.peek() {
                    Some(&'\n') => {
                        chars.next();
                        pending_newlines += 1;
                    }
                    Some(&'\r') => {
                        chars.next();
                        if chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                        pending_newlines += 1;
                    }
                    _ => out.push(ch),
                }
            } else if ch == '\n' {
                out.push('\n');
                for _ in 0..pending_newlines {
                    out.push('\n');
                }
                pending_newlines = 0;
            } else {
                out.push(ch);
            }
        }
        for _ in 0..pending_newlines {
            out.push('\n');
        }
        out
    }

    /// Strip comments, replacing each with a single space, unless `keep` is
    /// set (then they are passed through verbatim). Newlines inside block
    /// comments are preserved either way so line numbering stays intact.
    ///
    /// Returns the processed text and, if a block comment ran off the end of
    /// the input, the 1-based line where it started.
    pub(crate) fn strip_comments(input: &str, keep: bool) -> (String, Option<usize>) {
        if !input.contains('/') {
            return (input.to_string(), None);
        }

        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut line = 1usize;
        let mut in_string = false;
        let mut quote_char = '\0';
        let mut unterminated = None;

        while let Some(ch) = chars.next() {
            if ch == '\n' {
                line += 1;
                in_string = false;
                result.push(ch);
                continue;
            }
            if in_string {
                if ch == '\\' {
                    result.push(ch);
                    if let Some(c) = chars.next() {
                        if c == '\n' {
                            line += 1;
                        }
                        result.push(c);
                    }
                    continue;
                }
                if ch == quote_char {
                    in_string = false;
                }
                result.push(ch);
                continue;
            }
            match ch {
                '"' | '\'' => {
                    in_string = true;
                    quote_char = ch;
                    result.push(ch);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    if keep {
                        result.push_str("//");
                    } else {
                        result.push(' ');
                    }
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            result.push(c);
                            break;
                        }
                        if keep {
                            result.push(c);
                        }
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    let start_line = line;
                    if keep {
                        result.push_str("/*");
                    } else {
                        result.push(' ');
                    }
                    let mut prev = '\0';
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            result.push(c);
                        } else if keep {
                            result.push(c);
                        }
                        if prev == '*' && c == '/' {
                            closed = true;
                            break;
                        }
                        prev = c;
                    }
                    if !closed {
                        unterminated = Some(start_line);
                    }
                }
                _ => result.push(ch),
            }
        }
        (result, unterminated)
    }

    /// Replace digraph spellings (`<%`, `%:`, ...) outside string and
    /// character literals. `%:%:` must be handled before `%:`.
    pub(crate) fn replace_digraphs(line: &str) -> String {
        if !line.contains('%') && !line.contains('<') && !line.contains(':') {
            return line.to_string();
        }
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;
        let mut in_string = false;
        let mut quote_char = '\0';
        while i < chars.len() {
            let ch = chars[i];
            if in_string {
                out.push(ch);
                if ch == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if ch == quote_char {
                    in_string = false;
                }
                i += 1;
                continue;
            }
            if ch == '"' || ch == '\'' {
                in_string = true;
                quote_char = ch;
                out.push(ch);
                i += 1;
                continue;
            }
            if chars[i..].starts_with(&['%', ':', '%', ':']) {
                out.push_str("##");
                i += 4;
                continue;
            }
            let two = if i + 1 < chars.len() {
                Some((chars[i], chars[i + 1]))
            } else {
                None
            };
            match two {
                Some(('%', ':')) => {
                    out.push('#');
                    i += 2;
                }
                Some(('<', '%')) => {
                    out.push('{');
                    i += 2;
                }
                Some(('%', '>')) => {
                    out.push('}');
                    i += 2;
                }
                Some(('<', ':')) => {
                    out.push('[');
                    i += 2;
                }
                Some((':', '>')) => {
                    out.push(']');
                    i += 2;
                }
                _ => {
                    out.push(ch);
                    i += 1;
                }
            }
        }
        out
    }

    /// Rewrite `_Pragma("...")` operators into `#pragma ...` text, undoing
    /// `\"` and `\\` escapes in the string argument.
    pub(crate) fn process_pragma_operator(line: &str) -> String {
        if !line.contains("_Pragma") {
            return line.to_string();
        }
        let chars: Vec<char> = line.chars().collect();
        let mut result = String::with_capacity(line.len());
        let mut i = 0;

        while i < chars.len() {
            let at_boundary = i == 0 || !is_identifier_continue(chars[i - 1]);
            if at_boundary
                && i + 7 <= chars.len()
                && chars[i..i + 7] == ['_', 'P', 'r', 'a', 'g', 'm', 'a']
                && (i + 7 == chars.len() || !is_identifier_continue(chars[i + 7]))
            {
                let mut j = i + 7;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == '(' {
                    j += 1;
                    while j < chars.len() && chars[j].is_whitespace() {
                        j += 1;
                    }
                    if j < chars.len() && chars[j] == '"' {
                        j += 1;
                        let mut content = String::new();
                        let mut closed = false;
                        while j < chars.len() {
                            match chars[j] {
                                '\\' if j + 1 < chars.len() => {
                                    // Destringize: \" becomes ", \\ becomes \
                                    match chars[j + 1] {
                                        '"' => content.push('"'),
                                        '\\' => content.push('\\'),
                                        other => {
                                            content.push('\\');
                                            content.push(other);
                                        }
                                    }
                                    j += 2;
                                }
                                '"' => {
                                    closed = true;
                                    j += 1;
                                    break;
                                }
                                c => {
                                    content.push(c);
                                    j += 1;
                                }
                            }
                        }
                        while j < chars.len() && chars[j].is_whitespace() {
                            j += 1;
                        }
                        if closed && j < chars.len() && chars[j] == ')' {
                            j += 1;
                            trace!("_Pragma rewritten to #pragma {content}");
                            result.push_str("#pragma ");
                            result.push_str(&content);
                            i = j;
                            continue;
                        }
                    }
                }
            }
            result.push(chars[i]);
            i += 1;
        }
        result
    }

    /// Tokenize one logical line. Reports an unterminated string or character
    /// literal via the second return value; the literal is still produced
    /// with the line end as a best-effort boundary.
    pub(crate) fn tokenize_line_checked(line: &str) -> (Vec<Token>, Option<&'static str>) {
        let mut tokens = Vec::new();
        let mut unterminated = None;
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            if is_identifier_start(ch) {
                let start = i;
                while i < chars.len() && is_identifier_continue(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::ident(chars[start..i].iter().collect::<String>()));
            } else if ch.is_ascii_digit()
                || (ch == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit())
            {
                // pp-number: digits, identifier chars, '.', and e/E/p/P sign pairs
                let start = i;
                i += 1;
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        i += 1;
                    } else if (c == '+' || c == '-')
                        && matches!(chars[i - 1], 'e' | 'E' | 'p' | 'P')
                    {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::new(
                    TokenKind::Number,
                    chars[start..i].iter().collect::<String>(),
                ));
            } else if ch == '"' || ch == '\'' {
                let quote = ch;
                let mut s = String::new();
                s.push(quote);
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    let c = chars[i];
                    s.push(c);
                    i += 1;
                    if c == '\\' && i < chars.len() {
                        s.push(chars[i]);
                        i += 1;
                    } else if c == quote {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    unterminated = Some(if quote == '"' {
                        "string literal"
                    } else {
                        "character literal"
                    });
                }
                let kind = if quote == '"' {
                    TokenKind::StringLit
                } else {
                    TokenKind::CharLit
                };
                tokens.push(Token::new(kind, s));
            } else if ch.is_whitespace() {
                let start = i;
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }
                tokens.push(Token::new(
                    TokenKind::Whitespace,
                    chars[start..i].iter().collect::<String>(),
                ));
            } else {
                tokens.push(Self::scan_punct(&chars, &mut i));
            }
        }
        (tokens, unterminated)
    }

    /// Tokenize one logical line, discarding the unterminated-literal note.
    pub(crate) fn tokenize_line(line: &str) -> Vec<Token> {
        Self::tokenize_line_checked(line).0
    }

    /// Scan one punctuator with maximal munch (3-char, then 2-char, then 1).
    fn scan_punct(chars: &[char], i: &mut usize) -> Token {
        let rest = &chars[*i..];
        for p in PUNCT3 {
            if starts_with_str(rest, p) {
                *i += 3;
                return Token::punct(p);
            }
        }
        for p in PUNCT2 {
            if starts_with_str(rest, p) {
                *i += 2;
                return Token::punct(p);
            }
        }
        let t = Token::punct(rest[0].to_string());
        *i += 1;
        t
    }

    /// Reassemble a token sequence into text.
    pub(crate) fn tokens_to_string(tokens: &[Token]) -> String {
        let total: usize = tokens.iter().map(|t| t.text.len()).sum();
        let mut out = String::with_capacity(total);
        for t in tokens {
            out.push_str(&t.text);
        }
        out
    }

    /// Trim whitespace tokens from both ends of a token sequence.
    pub(crate) fn trim_token_whitespace(mut tokens: Vec<Token>) -> Vec<Token> {
        let mut start = 0;
        while start < tokens.len() && tokens[start].is_whitespace() {
            start += 1;
        }
        let mut end = tokens.len();
        while end > start && tokens[end - 1].is_whitespace() {
            end -= 1;
        }
        if start > 0 || end < tokens.len() {
            tokens.drain(end..);
            tokens.drain(0..start);
        }
        tokens
    }

    /// Net parenthesis balance of a token sequence. Positive means more `(`
    /// than `)`, which signals a macro invocation continuing on later lines.
    pub(crate) fn paren_balance(tokens: &[Token]) -> i32 {
        let mut depth = 0;
        for t in tokens {
            if t.is_punct("(") {
                depth += 1;
            } else if t.is_punct(")") {
                depth -= 1;
            }
        }
        depth
    }
}

fn starts_with_str(chars: &[char], s: &str) -> bool {
    let mut it = s.chars();
    let mut i = 0;
    for c in it.by_ref() {
        if i >= chars.len() || chars[i] != c {
            return false;
        }
        i += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_preserves_line_count() {
        let spliced = Scanner::line_splice("a \\\nb\nc\n");
        assert_eq!(spliced, "a b\n\nc\n");
        assert_eq!(spliced.lines().count(), 3);
    }

    #[test]
    fn trigraphs_replaced() {
        assert_eq!(Scanner::replace_trigraphs("??=define X 1"), "#define X 1");
        assert_eq!(Scanner::replace_trigraphs("a ??( b ??) c"), "a [ b ] c");
        assert_eq!(Scanner::replace_trigraphs("no trigraph ?? here"), "no trigraph ?? here");
    }

    #[test]
    fn digraphs_replaced_outside_strings() {
        assert_eq!(Scanner::replace_digraphs("%:define A <% %>"), "#define A { }");
        assert_eq!(Scanner::replace_digraphs("\"<%\" <%"), "\"<%\" {");
        assert_eq!(Scanner::replace_digraphs("a %:%: b"), "a ## b");
    }

    #[test]
    fn block_comment_keeps_newlines() {
        let (out, unterminated) = Scanner::strip_comments("a /* x\ny */ b\n", false);
        assert_eq!(out, "a  \n b\n");
        assert!(unterminated.is_none());
    }

    #[test]
    fn unterminated_comment_reported() {
        let (_, unterminated) = Scanner::strip_comments("ok\n/* runs off", false);
        assert_eq!(unterminated, Some(2));
    }

    #[test]
    fn comments_kept_when_requested() {
        let (out, _) = Scanner::strip_comments("x // tail\n", true);
        assert_eq!(out, "x // tail\n");
    }

    #[test]
    fn punctuators_use_maximal_munch() {
        let toks = Scanner::tokenize_line("a<<=b##c...d");
        let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "<<=", "b", "##", "c", "...", "d"]);
    }

    #[test]
    fn pp_number_spans_exponent_sign() {
        let toks = Scanner::tokenize_line("1.5e+10f x");
        assert_eq!(toks[0].text, "1.5e+10f");
        assert_eq!(toks[0].kind, TokenKind::Number);
    }

    #[test]
    fn unterminated_string_recovered() {
        let (toks, unterminated) = Scanner::tokenize_line_checked("\"abc");
        assert_eq!(unterminated, Some("string literal"));
        assert_eq!(toks[0].text, "\"abc");
    }

    #[test]
    fn pragma_operator_destringized() {
        let out = Scanner::process_pragma_operator("_Pragma(\"once\")");
        assert_eq!(out, "#pragma once");
        let out = Scanner::process_pragma_operator("_Pragma(\"message(\\\"hi\\\")\")");
        assert_eq!(out, "#pragma message(\"hi\")");
    }

    #[test]
    fn pragma_operator_needs_word_boundary() {
        let out = Scanner::process_pragma_operator("X_Pragma(\"once\")");
        assert_eq!(out, "X_Pragma(\"once\")");
    }
}
