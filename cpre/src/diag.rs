use std::fmt;

/// Warning classes, combined into the warning-level bitmask.
///
/// A warning is emitted only when its class bit is set in
/// [`crate::PreprocessorConfig::warn_level`].
pub mod warn_class {
    /// Routine diagnostics: suspicious redefinitions, unknown pragmas,
    /// undefining names that were never defined.
    pub const COMMON: u32 = 1;
    /// Chattier diagnostics of the same kind as [`COMMON`].
    pub const VERBOSE: u32 = 2;
    /// Portability concerns, including translation-limit excess.
    pub const PORTABILITY: u32 = 4;
    /// Use of obsolescent constructs.
    pub const OBSOLETE: u32 = 8;
    /// Stylistic nits.
    pub const STYLE: u32 = 16;
}

/// Severity of a diagnostic event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Conformance or portability concern; processing is unaffected.
    Warning,
    /// Recoverable defect; processing continues with a documented fallback.
    Error,
    /// Consistency or resource violation; the run is aborted.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal error"),
        }
    }
}

/// One diagnostic event, located at the source position where the offending
/// text originated (not where it ended up after macro substitution).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity of the event.
    pub severity: Severity,
    /// Human-readable message, already argument-substituted.
    pub message: String,
    /// File the offending text came from.
    pub file: String,
    /// 1-based line number within `file`.
    pub line: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.file, self.line, self.severity, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let d = Diagnostic {
            severity: Severity::Error,
            message: "invalid token paste".to_string(),
            file: "m.c".to_string(),
            line: 12,
        };
        assert_eq!(d.to_string(), "m.c:12: error: invalid token paste");
    }
}
