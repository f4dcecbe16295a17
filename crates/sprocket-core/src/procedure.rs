//! Procedure and version snapshot models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a procedure. Only Published SQL is executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureStatus {
    Draft,
    Published,
}

impl ProcedureStatus {
    /// Stable string form used by the metadata store
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureStatus::Draft => "draft",
            ProcedureStatus::Published => "published",
        }
    }

    /// Parse the store's string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ProcedureStatus::Draft),
            "published" => Some(ProcedureStatus::Published),
            _ => None,
        }
    }
}

/// A stored procedure record owned by one tenant.
///
/// Invariant: `status == Published` implies `sql_published` and
/// `published_at` are both set, and unpublish clears all three together.
/// Rollback is the one transition that forces Draft while leaving the
/// published fields in place as a historical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Unique within the tenant
    pub name: String,
    pub status: ProcedureStatus,
    pub sql_draft: String,
    pub sql_published: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Procedure {
    /// Create a new draft procedure
    pub fn new_draft(tenant_id: Uuid, name: &str, sql_draft: &str, created_by: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            status: ProcedureStatus::Draft,
            sql_draft: sql_draft.to_string(),
            sql_published: None,
            published_at: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the procedure is currently published
    pub fn is_published(&self) -> bool {
        self.status == ProcedureStatus::Published
    }

    /// Flip to Published, recording the deployed SQL and timestamp
    pub fn mark_published(&mut self, sql: &str, at: DateTime<Utc>) {
        self.status = ProcedureStatus::Published;
        self.sql_published = Some(sql.to_string());
        self.published_at = Some(at);
        self.updated_at = at;
    }

    /// Flip back to Draft, clearing the published fields
    pub fn mark_unpublished(&mut self) {
        self.status = ProcedureStatus::Draft;
        self.sql_published = None;
        self.published_at = None;
        self.updated_at = Utc::now();
    }

    /// Check the Published-fields invariant holds
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            ProcedureStatus::Published => {
                self.sql_published.is_some() && self.published_at.is_some()
            }
            // A Draft may still carry published fields after a rollback.
            ProcedureStatus::Draft => true,
        }
    }
}

/// Where a version snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// Explicit draft snapshot action
    Draft,
    /// Taken automatically on successful publish
    Published,
}

impl VersionSource {
    /// Stable string form used by the metadata store
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionSource::Draft => "draft",
            VersionSource::Published => "published",
        }
    }

    /// Parse the store's string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(VersionSource::Draft),
            "published" => Some(VersionSource::Published),
            _ => None,
        }
    }
}

/// An immutable snapshot of a procedure's SQL.
///
/// `version` values are strictly increasing per procedure and never
/// rewritten once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureVersion {
    pub id: Uuid,
    pub procedure_id: Uuid,
    pub tenant_id: Uuid,
    /// Positive, monotonically increasing per procedure
    pub version: i64,
    pub source: VersionSource,
    /// Procedure name at snapshot time
    pub name: String,
    pub sql_text: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_unpublish_maintain_invariant() {
        let mut proc = Procedure::new_draft(Uuid::new_v4(), "p", "CREATE PROCEDURE ...", "alice");
        assert!(proc.invariant_holds());
        assert!(!proc.is_published());

        proc.mark_published("CREATE PROCEDURE ...", Utc::now());
        assert!(proc.invariant_holds());
        assert!(proc.is_published());
        assert!(proc.sql_published.is_some());

        proc.mark_unpublished();
        assert!(proc.invariant_holds());
        assert!(proc.sql_published.is_none());
        assert!(proc.published_at.is_none());
    }

    #[test]
    fn status_round_trips_through_store_form() {
        for status in [ProcedureStatus::Draft, ProcedureStatus::Published] {
            assert_eq!(ProcedureStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProcedureStatus::parse("archived"), None);
    }

    #[test]
    fn source_round_trips_through_store_form() {
        for source in [VersionSource::Draft, VersionSource::Published] {
            assert_eq!(VersionSource::parse(source.as_str()), Some(source));
        }
    }
}
