//! Deploy-time SQL canonicalization

use sprocket_validate::{bracket_quote, parse_header};

/// SQL ready to execute on the tenant engine, plus the name it deploys
/// under (exactly as it appears in the statement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSql {
    pub sql: String,
    pub deployed_name: String,
}

/// Canonicalize draft SQL for deployment.
///
/// SQL that already carries a recognized procedure header passes through
/// with comments stripped; anything else is treated as a bare body and
/// wrapped in a generated `CREATE OR ALTER PROCEDURE` header using the
/// procedure record's name.
pub fn canonicalize(sql: &str, procedure_name: &str) -> CanonicalSql {
    match parse_header(sql) {
        Some(header) => CanonicalSql {
            sql: strip_comments(sql).trim().to_string(),
            deployed_name: header.name,
        },
        None => {
            let quoted = bracket_quote(procedure_name);
            CanonicalSql {
                sql: format!("CREATE OR ALTER PROCEDURE {} AS\n{}", quoted, sql.trim()),
                deployed_name: quoted,
            }
        }
    }
}

/// Remove `--` line comments and `/* */` block comments.
///
/// Comment markers inside string literals are left alone. Line comments
/// keep their trailing newline so line numbers stay stable; block
/// comments collapse to a single space.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push(c);
                // Consume through the closing quote, honoring '' escapes.
                while let Some(sc) = chars.next() {
                    out.push(sc);
                    if sc == '\'' {
                        if chars.peek() == Some(&'\'') {
                            out.push(chars.next().unwrap_or_default());
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                for sc in chars.by_ref() {
                    if sc == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for sc in chars.by_ref() {
                    if prev == '*' && sc == '/' {
                        break;
                    }
                    prev = sc;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}
