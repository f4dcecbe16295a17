//! Sprocket Execute - running published procedures
//!
//! Builds a safely parameterized `EXEC` invocation (declared variables
//! assigned from bound placeholders, never interpolated text), races it
//! against a clamped timeout, and shapes whatever heterogeneous result
//! set comes back. Only Published SQL is executable.

mod engine;
mod redact;
mod shape;


pub use engine::{ExecutionEngine, ExecutionOutcome, ExecutionRequest};
pub use redact::{REDACTED, redact_parameters};
pub use shape::{ColumnInfo, ColumnKind, ShapedResult, shape};
