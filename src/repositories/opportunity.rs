//! # Opportunity Repository
//!
//! Reads and conditional writes over the opportunity assignment projection.
//! Every write bumps `assignment_version`; the SLA claim and the terminal limit
//! actions are compare-and-swap updates on that version, so a concurrent manual
//! reassignment or first-contact mark always invalidates a stale decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DistributionError;
use crate::models::distribution_config::SlaLimitAction;
use crate::models::opportunity::{self, ActiveModel, Column, Entity as Opportunity, StageStatus};

/// Result of trying to claim an overdue opportunity for an SLA decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the decision; `version` is the projection version the
    /// claim wrote and the decision must still match.
    Won { version: i64 },
    /// Another writer changed the opportunity first. Not an error.
    Lost,
}

/// Repository for the opportunity assignment projection
#[derive(Debug, Clone)]
pub struct OpportunityRepository {
    db: Arc<DatabaseConnection>,
}

impl OpportunityRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create an open, unassigned opportunity at the pipeline's entry stage
    pub async fn create_lead(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
    ) -> Result<opportunity::Model, DistributionError> {
        let now = Utc::now().fixed_offset();
        let model = opportunity::Model {
            id: Uuid::new_v4(),
            tenant_id,
            pipeline_id,
            stage_status: StageStatus::Open,
            responsible_member_id: None,
            assigned_at: None,
            sla_checked_at: None,
            first_contact_at: None,
            sla_exhausted: false,
            needs_manual_assignment: false,
            assignment_version: 0,
            created_at: now,
            updated_at: now,
        };

        let active = ActiveModel {
            id: Set(model.id),
            tenant_id: Set(model.tenant_id),
            pipeline_id: Set(model.pipeline_id),
            stage_status: Set(model.stage_status),
            responsible_member_id: Set(None),
            assigned_at: Set(None),
            sla_checked_at: Set(None),
            first_contact_at: Set(None),
            sla_exhausted: Set(false),
            needs_manual_assignment: Set(false),
            assignment_version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Opportunity::insert(active)
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("insert opportunity", err))?;

        debug!(
            opportunity_id = %model.id,
            pipeline_id = %pipeline_id,
            "Lead entered pipeline"
        );

        Ok(model)
    }

    pub async fn find(
        &self,
        opportunity_id: Uuid,
    ) -> Result<Option<opportunity::Model>, DistributionError> {
        Opportunity::find_by_id(opportunity_id)
            .one(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("load opportunity", err))
    }

    /// Record the first contact with the lead.
    ///
    /// Only the first call has an effect; returns whether this call set it. The
    /// version bump makes any SLA claim taken before the contact lose its race.
    pub async fn mark_first_contact(
        &self,
        opportunity_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, DistributionError> {
        let result = Opportunity::update_many()
            .col_expr(Column::FirstContactAt, Expr::value(at.fixed_offset()))
            .col_expr(
                Column::AssignmentVersion,
                Expr::col(Column::AssignmentVersion).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(opportunity_id))
            .filter(Column::FirstContactAt.is_null())
            .exec(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("mark first contact", err))?;

        let applied = result.rows_affected > 0;
        if applied {
            info!(opportunity_id = %opportunity_id, contacted_at = %at, "First contact recorded");
        }
        Ok(applied)
    }

    /// Move an opportunity to a won or lost stage, freezing its projection.
    pub async fn close(
        &self,
        opportunity_id: Uuid,
        status: StageStatus,
    ) -> Result<bool, DistributionError> {
        let result = Opportunity::update_many()
            .col_expr(Column::StageStatus, Expr::value(status))
            .col_expr(
                Column::AssignmentVersion,
                Expr::col(Column::AssignmentVersion).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(opportunity_id))
            .filter(Column::StageStatus.eq(StageStatus::Open))
            .exec(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("close opportunity", err))?;

        Ok(result.rows_affected > 0)
    }

    /// Open, assigned, uncontacted, non-exhausted opportunities of a pipeline
    /// whose assignment and last SLA claim are both at or before `cutoff`,
    /// oldest assignment first.
    pub async fn sla_candidates(
        &self,
        pipeline_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<opportunity::Model>, DistributionError> {
        Opportunity::find()
            .filter(Column::PipelineId.eq(pipeline_id))
            .filter(Column::StageStatus.eq(StageStatus::Open))
            .filter(Column::SlaExhausted.eq(false))
            .filter(Column::ResponsibleMemberId.is_not_null())
            .filter(Column::FirstContactAt.is_null())
            .filter(Column::AssignedAt.lte(cutoff.fixed_offset()))
            .filter(
                Condition::any()
                    .add(Column::SlaCheckedAt.is_null())
                    .add(Column::SlaCheckedAt.lte(cutoff.fixed_offset())),
            )
            .order_by_asc(Column::AssignedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("load SLA candidates", err))
    }

    /// Claim an overdue opportunity for one SLA decision.
    ///
    /// Succeeds only if nothing has written the projection since `candidate`
    /// was read and it is still eligible. The claim stamps `sla_checked_at`, so
    /// an overlapping scan no longer sees the opportunity as overdue until
    /// another window has passed. `assigned_at` is left to real assignments.
    pub async fn claim_for_sla(
        &self,
        candidate: &opportunity::Model,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DistributionError> {
        let claimed_version = candidate.assignment_version + 1;
        let result = Opportunity::update_many()
            .col_expr(Column::SlaCheckedAt, Expr::value(Some(now.fixed_offset())))
            .col_expr(Column::AssignmentVersion, Expr::value(claimed_version))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(candidate.id))
            .filter(Column::AssignmentVersion.eq(candidate.assignment_version))
            .filter(Column::StageStatus.eq(StageStatus::Open))
            .filter(Column::SlaExhausted.eq(false))
            .filter(Column::FirstContactAt.is_null())
            .filter(Column::ResponsibleMemberId.is_not_null())
            .exec(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("claim opportunity for SLA", err))?;

        if result.rows_affected == 0 {
            return Ok(ClaimOutcome::Lost);
        }

        Ok(ClaimOutcome::Won {
            version: claimed_version,
        })
    }

    /// Tag an opportunity for manual pickup, keeping its current owner.
    ///
    /// With `expected_version` the write only lands if the projection is still
    /// at that version.
    pub async fn mark_needs_manual(
        &self,
        opportunity_id: Uuid,
        expected_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, DistributionError> {
        let mut update = Opportunity::update_many()
            .col_expr(Column::NeedsManualAssignment, Expr::value(true))
            .col_expr(
                Column::AssignmentVersion,
                Expr::col(Column::AssignmentVersion).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(opportunity_id));

        if let Some(version) = expected_version {
            update = update.filter(Column::AssignmentVersion.eq(version));
        }

        let result = update
            .exec(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("tag opportunity for manual pickup", err))?;

        Ok(result.rows_affected > 0)
    }

    /// Apply the terminal SLA limit action and mark the opportunity exhausted.
    ///
    /// Returns false when the projection moved past `expected_version`, in which
    /// case nothing was written.
    pub async fn apply_limit_action(
        &self,
        opportunity_id: Uuid,
        action: SlaLimitAction,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DistributionError> {
        let mut update = Opportunity::update_many()
            .col_expr(Column::SlaExhausted, Expr::value(true))
            .col_expr(Column::AssignmentVersion, Expr::value(expected_version + 1))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()));

        update = match action {
            SlaLimitAction::KeepLastAssignee => update,
            SlaLimitAction::ReturnToAdminQueue => update
                .col_expr(
                    Column::ResponsibleMemberId,
                    Expr::value(Option::<Uuid>::None),
                )
                .col_expr(Column::NeedsManualAssignment, Expr::value(true)),
            SlaLimitAction::Unassign => update
                .col_expr(
                    Column::ResponsibleMemberId,
                    Expr::value(Option::<Uuid>::None),
                )
                .col_expr(
                    Column::AssignedAt,
                    Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
                ),
        };

        let result = update
            .filter(Column::Id.eq(opportunity_id))
            .filter(Column::AssignmentVersion.eq(expected_version))
            .filter(Column::SlaExhausted.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("apply SLA limit action", err))?;

        Ok(result.rows_affected > 0)
    }
}
