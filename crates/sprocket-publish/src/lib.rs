//! Sprocket Publish - the Draft to Published pipeline
//!
//! Publishing runs three stages in strict sequence, each short-circuiting
//! on failure: precheck (temp-compile validation), deploy (canonicalized
//! SQL executed on the tenant engine), verify (routine catalog lookup).
//! Only a fully successful run persists anything or snapshots a version.

mod canonical;
mod pipeline;
mod results;


pub use canonical::{CanonicalSql, canonicalize, strip_comments};
pub use pipeline::{ProcedurePublisher, Publisher};
pub use results::{DeployResult, PrecheckResult, PublishReport, UnpublishReport, VerifyResult};
