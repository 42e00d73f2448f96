//! # Error Handling
//!
//! Typed failures returned by the distribution core to its calling services.
//! Nothing here is rendered to end users; callers branch on the variant.

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by assignment, configuration and SLA operations.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// Round-robin found nobody eligible and the pipeline has no manual fallback.
    #[error("no eligible member available in pipeline {pipeline_id}")]
    NoAssigneeAvailable { pipeline_id: Uuid },

    /// Configuration rejected at write time.
    #[error("invalid distribution config: {reason}")]
    ConfigInvalid { reason: String },

    /// The rotation cursor changed between read and write, even after a retry.
    #[error("rotation cursor for pipeline {pipeline_id} changed concurrently")]
    StaleCursor { pipeline_id: Uuid },

    #[error("opportunity {opportunity_id} not found")]
    OpportunityNotFound { opportunity_id: Uuid },

    #[error("opportunity {opportunity_id} is closed and can no longer be assigned")]
    OpportunityClosed { opportunity_id: Uuid },

    #[error("member {member_id} is not linked to pipeline {pipeline_id}")]
    MemberNotInPipeline { member_id: Uuid, pipeline_id: Uuid },

    #[error("database error while trying to {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: DbErr,
    },
}

impl DistributionError {
    pub fn config_invalid<S: Into<String>>(reason: S) -> Self {
        Self::ConfigInvalid {
            reason: reason.into(),
        }
    }

    /// Wrap a store error, logging it where it happened.
    pub fn database(context: &'static str, source: DbErr) -> Self {
        tracing::error!(error = ?source, context, "Database operation failed");
        Self::Database { context, source }
    }

    /// Whether the failure is a lost optimistic-concurrency race worth one retry.
    pub fn is_stale_cursor(&self) -> bool {
        matches!(self, Self::StaleCursor { .. })
    }

    /// Short machine-readable code, used as a metric label for failed SLA decisions.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoAssigneeAvailable { .. } => "NO_ASSIGNEE_AVAILABLE",
            Self::ConfigInvalid { .. } => "CONFIG_INVALID",
            Self::StaleCursor { .. } => "STALE_CURSOR",
            Self::OpportunityNotFound { .. } => "OPPORTUNITY_NOT_FOUND",
            Self::OpportunityClosed { .. } => "OPPORTUNITY_CLOSED",
            Self::MemberNotInPipeline { .. } => "MEMBER_NOT_IN_PIPELINE",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }
}

/// Whether a store error is a unique-key violation (a concurrent insert won).
pub fn is_unique_violation(error: &DbErr) -> bool {
    matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
