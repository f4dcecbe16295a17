//! Sprocket Validate - temp-compile syntax validation
//!
//! Validates procedure SQL against the tenant's live engine by creating
//! it under a throwaway name and immediately dropping it. The engine's
//! own grammar does the parsing; this crate only rewrites the declared
//! name, runs the batch, and normalizes whatever the engine complains
//! about.

mod parse;
mod rewrite;
mod validator;

pub use parse::MssqlErrorParser;
pub use rewrite::{ProcedureHeader, bracket_quote, parse_header, rewrite_name};
pub use validator::{SyntaxValidator, TempCompileValidator};
