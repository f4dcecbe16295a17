//! Publish stage results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sprocket_core::ValidationIssue;

/// Outcome of the precheck stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecheckResult {
    pub success: bool,
    /// Whether the pipeline may continue (no error-severity issues)
    pub can_proceed: bool,
    pub issues: Vec<ValidationIssue>,
    pub duration_ms: u64,
}

/// Outcome of the deploy stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResult {
    pub success: bool,
    /// The name the procedure deployed under, as written in the statement
    pub deployed_name: Option<String>,
    pub issues: Vec<ValidationIssue>,
    pub duration_ms: u64,
}

/// Outcome of the verify stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub success: bool,
    /// Whether the routine was found in the engine catalog
    pub verified: bool,
    /// The engine's stored object definition, when available
    pub object_definition: Option<String>,
    pub issues: Vec<ValidationIssue>,
    pub duration_ms: u64,
}

/// Full report of one publish attempt.
///
/// Stages that never ran (because an earlier one failed) are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReport {
    pub success: bool,
    /// Name of the failing stage when `success` is false
    pub failed_stage: Option<String>,
    pub precheck: Option<PrecheckResult>,
    pub deploy: Option<DeployResult>,
    pub verify: Option<VerifyResult>,
    /// Version number snapshotted on success
    pub version: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
}

impl PublishReport {
    /// All issues across stages, in pipeline order
    pub fn issues(&self) -> Vec<&ValidationIssue> {
        let mut issues = Vec::new();
        if let Some(ref stage) = self.precheck {
            issues.extend(stage.issues.iter());
        }
        if let Some(ref stage) = self.deploy {
            issues.extend(stage.issues.iter());
        }
        if let Some(ref stage) = self.verify {
            issues.extend(stage.issues.iter());
        }
        issues
    }
}

/// Report of one unpublish attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpublishReport {
    pub success: bool,
    /// Whether a drop actually ran (false when the object was already gone)
    pub dropped: bool,
    pub issues: Vec<ValidationIssue>,
    pub duration_ms: u64,
}
