use crate::token::Token;

/// Predefined macros whose replacement is computed at each reference
/// instead of being stored as static text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MagicMacro {
    /// `__LINE__`: current source line number.
    Line,
    /// `__FILE__`: current source file name as a string literal.
    File,
    /// `__DATE__`: translation date, `"Mmm dd yyyy"`.
    Date,
    /// `__TIME__`: translation time, `"hh:mm:ss"`.
    Time,
    /// `_Pragma`: operator rewritten into a `#pragma` line by the driver.
    Pragma,
}

/// The shape of a macro definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MacroKind {
    Object,
    Function { params: Vec<String>, variadic: bool },
    Magic(MagicMacro),
}

/// A preprocessor macro definition.
///
/// `location` is the defining file and line, `None` for definitions supplied
/// by configuration and for the magic predefined macros.
#[derive(Clone, Debug)]
pub(crate) struct MacroDef {
    pub(crate) name: String,
    pub(crate) kind: MacroKind,
    pub(crate) body: Vec<Token>,
    pub(crate) location: Option<(String, usize)>,
}

impl MacroDef {
    pub(crate) fn object<S: Into<String>>(name: S, body: Vec<Token>) -> Self {
        MacroDef {
            name: name.into(),
            kind: MacroKind::Object,
            body,
            location: None,
        }
    }

    pub(crate) fn function<S: Into<String>>(
        name: S,
        params: Vec<String>,
        variadic: bool,
        body: Vec<Token>,
    ) -> Self {
        MacroDef {
            name: name.into(),
            kind: MacroKind::Function { params, variadic },
            body,
            location: None,
        }
    }

    pub(crate) fn magic(name: &str, which: MagicMacro) -> Self {
        MacroDef {
            name: name.to_string(),
            kind: MacroKind::Magic(which),
            body: Vec::new(),
            location: None,
        }
    }

    pub(crate) fn at(mut self, file: &str, line: usize) -> Self {
        self.location = Some((file.to_string(), line));
        self
    }

    /// Whether redefining this macro as `other` is benign. The Standard
    /// requires the parameter lists and replacement spellings to match,
    /// whitespace runs being equivalent.
    pub(crate) fn same_definition(&self, other: &MacroDef) -> bool {
        self.kind == other.kind && body_spelling(&self.body) == body_spelling(&other.body)
    }
}

/// Replacement-list spelling with whitespace runs collapsed, for
/// redefinition comparison.
fn body_spelling(body: &[Token]) -> Vec<&str> {
    body.iter()
        .map(|t| if t.is_whitespace() { " " } else { t.text.as_str() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    #[test]
    fn equivalent_whitespace_is_same_definition() {
        let a = MacroDef::object("M", Scanner::tokenize_line("x  +  y"));
        let b = MacroDef::object("M", Scanner::tokenize_line("x + y"));
        assert!(a.same_definition(&b));
    }

    #[test]
    fn different_body_is_different_definition() {
        let a = MacroDef::object("M", Scanner::tokenize_line("1"));
        let b = MacroDef::object("M", Scanner::tokenize_line("2"));
        assert!(!a.same_definition(&b));
    }

    #[test]
    fn parameter_rename_is_different_definition() {
        let a = MacroDef::function("F", vec!["a".into()], false, Scanner::tokenize_line("a"));
        let b = MacroDef::function("F", vec!["b".into()], false, Scanner::tokenize_line("b"));
        assert!(!a.same_definition(&b));
    }
}
