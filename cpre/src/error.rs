use std::fmt;

/// Fatal conditions that abort a preprocessing run.
///
/// Recoverable problems (bad expressions, mismatched arguments, invalid
/// pastes) are reported as [`crate::Diagnostic`]s and processing continues;
/// the variants here are the ones where continuing would be unsafe.
#[derive(Debug)]
pub enum PreprocessError {
    /// Include files nested beyond the hard limit.
    IncludeNestingTooDeep(String),
    /// Conditional directives nested beyond the hard limit.
    ConditionalNestingTooDeep(String),
    /// Macro rescanning exceeded the configured recursion limit.
    RecursionLimitExceeded(String),
    /// I/O error reading the primary input or writing output.
    Io(std::io::Error),
    /// Other fatal preprocessing error.
    Other(String),
}

impl fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreprocessError::IncludeNestingTooDeep(s) => {
                write!(f, "too many nested includes: {s}")
            }
            PreprocessError::ConditionalNestingTooDeep(s) => {
                write!(f, "too many nested conditionals: {s}")
            }
            PreprocessError::RecursionLimitExceeded(s) => write!(f, "recursion limit: {s}"),
            PreprocessError::Io(err) => write!(f, "I/O error: {err}"),
            PreprocessError::Other(s) => write!(f, "error: {s}"),
        }
    }
}
impl std::error::Error for PreprocessError {}

impl From<std::io::Error> for PreprocessError {
    fn from(err: std::io::Error) -> Self {
        PreprocessError::Io(err)
    }
}
