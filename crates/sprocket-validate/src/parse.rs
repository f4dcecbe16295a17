//! SQL Server error text normalization

use regex::Regex;
use sprocket_core::{EngineErrorParser, ParsedEngineError};
use std::sync::LazyLock;

// Classic SSMS-style prefix: "Msg 102, Level 15, State 1, Line 3:".
// An optional "Procedure X," segment appears for errors inside routines.
static MSG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*Msg\s+(\d+),\s*Level\s+\d+,\s*State\s+\d+,\s*(?:Procedure\s+[^,]+,\s*)?Line\s+(\d+)[:.]?\s*",
    )
    .expect("msg prefix regex")
});

// tiberius wraps server errors in its own framing, e.g.
// "Server error: Code: 102, ... line: 3 ... Incorrect syntax near 'X'."
static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcode:\s*(\d+)\b").expect("code regex"));

static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bline[:\s]+(\d+)\b").expect("line regex"));

static COLUMN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcolumn[:\s]+(\d+)\b").expect("column regex"));

static NEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bnear\s+'([^']*)'").expect("near regex"));

// Driver framing that carries no information for the caller.
static WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:Token error:|Server error:|Engine error:)\s*").expect("wrapper regex")
});

/// Parses SQL Server / tiberius error text into a [`ParsedEngineError`].
///
/// Because validation only renames the declared identifier and never
/// injects lines, the line numbers extracted here map directly back to
/// the SQL the caller submitted.
#[derive(Debug, Default)]
pub struct MssqlErrorParser;

impl MssqlErrorParser {
    pub fn new() -> Self {
        Self
    }
}

impl EngineErrorParser for MssqlErrorParser {
    fn parse(&self, raw: &str) -> ParsedEngineError {
        let mut message = raw.trim().to_string();
        let mut code: Option<i64> = None;
        let mut line: Option<u32> = None;

        // Strip driver framing first so the vendor prefix is at the front.
        while let Some(m) = WRAPPER_RE.find(&message) {
            message = message[m.end()..].trim_start().to_string();
        }

        if let Some(captures) = MSG_PREFIX_RE.captures(&message) {
            code = captures.get(1).and_then(|m| m.as_str().parse().ok());
            line = captures.get(2).and_then(|m| m.as_str().parse().ok());
            let end = captures.get(0).map(|m| m.end()).unwrap_or(0);
            message = message[end..].trim_start().to_string();
        }

        if code.is_none() {
            code = CODE_RE
                .captures(&message)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok());
        }
        if line.is_none() {
            line = LINE_RE
                .captures(&message)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok());
        }

        let column = COLUMN_RE
            .captures(&message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());

        let near = NEAR_RE
            .captures(&message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty());

        if let Some(n) = line {
            message = strip_duplicate_line(&message, n);
        }

        ParsedEngineError {
            message: message.trim().to_string(),
            line,
            column,
            near,
            code,
        }
    }
}

// The engine sometimes repeats "Line N:" inside the message body after
// we already lifted it into the structured field.
fn strip_duplicate_line(message: &str, line: u32) -> String {
    let pattern = format!(r"(?i)\s*\bLine\s+{line}\s*:\s*");
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(message, " ").trim().to_string(),
        Err(_) => message.to_string(),
    }
}
