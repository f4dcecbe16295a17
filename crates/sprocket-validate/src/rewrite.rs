//! Procedure header detection and name rewriting
//!
//! The rewriter swaps the declared procedure name for a temporary
//! identifier without touching the body or adding lines, so engine
//! error line numbers map straight back to the submitted SQL.

use regex::Regex;
use std::sync::LazyLock;

// Matches `CREATE [OR ALTER] PROCEDURE <name>` / `ALTER PROCEDURE <name>`
// at the start of the SQL. The name may be bare, [bracketed], "quoted",
// and schema-qualified.
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(CREATE\s+(?:OR\s+ALTER\s+)?|ALTER\s+)PROC(?:EDURE)?\s+((?:\[[^\]]+\]|"[^"]+"|[A-Za-z_#][A-Za-z0-9_$#@]*)(?:\s*\.\s*(?:\[[^\]]+\]|"[^"]+"|[A-Za-z_#][A-Za-z0-9_$#@]*))?)"#,
    )
    .expect("procedure header regex")
});

/// The recognized header of a procedure definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureHeader {
    /// Declared name exactly as written (possibly quoted and qualified)
    pub name: String,
    /// Byte span of the name within the SQL
    name_start: usize,
    name_end: usize,
}

impl ProcedureHeader {
    /// Span of the declared name
    pub fn name_span(&self) -> (usize, usize) {
        (self.name_start, self.name_end)
    }
}

/// Parse the procedure header, if the SQL begins with one.
///
/// Only leading whitespace may precede the header; anything else means
/// the SQL is not a recognizable procedure definition.
pub fn parse_header(sql: &str) -> Option<ProcedureHeader> {
    let captures = HEADER_RE.captures(sql)?;
    let name = captures.get(2)?;
    Some(ProcedureHeader {
        name: name.as_str().to_string(),
        name_start: name.start(),
        name_end: name.end(),
    })
}

/// Bracket-quote an identifier for safe embedding in T-SQL text.
///
/// Closing brackets are doubled, which is the only escape the engine
/// recognizes inside `[...]`.
pub fn bracket_quote(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Replace the declared procedure name with `new_name` (bracket-quoted).
///
/// Returns `None` when the SQL has no recognizable header. The
/// replacement stays on the header's line, so line numbers in engine
/// errors need no adjustment.
pub fn rewrite_name(sql: &str, new_name: &str) -> Option<String> {
    let header = parse_header(sql)?;
    let (start, end) = header.name_span();
    let mut rewritten = String::with_capacity(sql.len() + new_name.len() + 2);
    rewritten.push_str(&sql[..start]);
    rewritten.push_str(&bracket_quote(new_name));
    rewritten.push_str(&sql[end..]);
    Some(rewritten)
}
