//! Validation issues and normalized engine errors

use serde::{Deserialize, Serialize};

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding from validating or deploying SQL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Human-readable description, already stripped of vendor prefixes
    pub message: String,
    /// 1-based line in the submitted SQL, when the engine reported one
    pub line: Option<u32>,
    /// 1-based column, when the engine reported one
    pub column: Option<u32>,
    /// The token the engine choked on, e.g. from "Incorrect syntax near 'X'"
    pub near: Option<String>,
    /// Vendor error code
    pub code: Option<i64>,
    /// Whether this blocks the operation
    pub severity: Severity,
}

impl ValidationIssue {
    /// Create an error-severity issue with just a message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
            near: None,
            code: None,
            severity: Severity::Error,
        }
    }

    /// Create a warning-severity issue
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    /// Attach a line number
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Whether this issue blocks publish/validate
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// A vendor error normalized by an [`EngineErrorParser`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEngineError {
    /// Message with vendor prefixes stripped
    pub message: String,
    /// Line number, if the vendor text carried one
    pub line: Option<u32>,
    /// Column number, if the vendor text carried one
    pub column: Option<u32>,
    /// Offending token
    pub near: Option<String>,
    /// Vendor error code (e.g. Msg number)
    pub code: Option<i64>,
}

impl ParsedEngineError {
    /// Wrap a raw message with no positional information
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
            near: None,
            code: None,
        }
    }

    /// Convert into an error-severity validation issue
    pub fn into_issue(self) -> ValidationIssue {
        ValidationIssue {
            message: self.message,
            line: self.line,
            column: self.column,
            near: self.near,
            code: self.code,
            severity: Severity::Error,
        }
    }
}

impl std::fmt::Display for ParsedEngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        if let Some(ref near) = self.near {
            write!(f, " near '{}'", near)?;
        }
        Ok(())
    }
}

/// Normalizes raw vendor error text into a [`ParsedEngineError`].
///
/// One implementation per target engine; raw driver text must always pass
/// through this before reaching a caller.
pub trait EngineErrorParser: Send + Sync {
    /// Parse raw driver/vendor error text
    fn parse(&self, raw: &str) -> ParsedEngineError;
}
