//! Assignment service: decides who owns an opportunity and journals it.
//!
//! An automatic assignment advances the rotation cursor, updates the
//! opportunity projection and appends the history record in one transaction.
//! Roster and configuration reads happen before the transaction opens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::distribution::roster::{RosterDirectory, RosterSnapshot, RosterView};
use crate::distribution::round_robin::{RoundRobinSelector, Selection, retry_on_stale_cursor};
use crate::error::DistributionError;
use crate::models::assignment_record::{self, AssignmentMode};
use crate::models::distribution_config::{self, DistributionMode};
use crate::models::opportunity::{self, Column, Entity as Opportunity, StageStatus};
use crate::repositories::assignment_record::{append, count_redistributions};
use crate::repositories::{
    DistributionConfigRepository, OpportunityRepository, PipelineMemberRepository,
};

const SLA_TIMEOUT_REASON: &str = "sla_timeout";

/// What caused an assignment request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentTrigger {
    NewLead,
    SlaRedistribution,
}

/// Input to [`AssignmentService::assign`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRequest {
    pub opportunity_id: Uuid,
    pub pipeline_id: Uuid,
    pub trigger: AssignmentTrigger,
    /// Admin override; skips the rotation
    pub explicit_member_id: Option<Uuid>,
    /// When set, the write only lands if the opportunity is still at this version
    pub expected_version: Option<i64>,
    pub reason: Option<String>,
}

impl AssignRequest {
    pub fn new_lead(opportunity_id: Uuid, pipeline_id: Uuid) -> Self {
        Self {
            opportunity_id,
            pipeline_id,
            trigger: AssignmentTrigger::NewLead,
            explicit_member_id: None,
            expected_version: None,
            reason: None,
        }
    }

    pub fn explicit(opportunity_id: Uuid, pipeline_id: Uuid, member_id: Uuid) -> Self {
        Self {
            explicit_member_id: Some(member_id),
            ..Self::new_lead(opportunity_id, pipeline_id)
        }
    }

    pub fn sla_redistribution(opportunity_id: Uuid, pipeline_id: Uuid, claimed_version: i64) -> Self {
        Self {
            opportunity_id,
            pipeline_id,
            trigger: AssignmentTrigger::SlaRedistribution,
            explicit_member_id: None,
            expected_version: Some(claimed_version),
            reason: Some(SLA_TIMEOUT_REASON.to_string()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Outcome of an assignment request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentResult {
    Assigned {
        member_id: Uuid,
        mode: AssignmentMode,
        redistribution_sequence: i32,
        record_id: Uuid,
    },
    /// No member was chosen; the opportunity waits in the admin queue
    NeedsManualAssignment,
    /// The opportunity changed after `expected_version`; nothing was written
    Superseded,
}

impl AssignmentResult {
    pub fn assigned_member(&self) -> Option<Uuid> {
        match self {
            AssignmentResult::Assigned { member_id, .. } => Some(*member_id),
            _ => None,
        }
    }
}

/// Assigns opportunities manually or through the pipeline rotation
#[derive(Clone)]
pub struct AssignmentService {
    db: Arc<DatabaseConnection>,
    configs: DistributionConfigRepository,
    opportunities: OpportunityRepository,
    roster: RosterView,
}

impl AssignmentService {
    /// Service backed by the `pipeline_members` table
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        let directory: Arc<dyn RosterDirectory> =
            Arc::new(PipelineMemberRepository::new(db.clone()));
        Self::with_roster(db, directory)
    }

    /// Service reading membership from another roster source
    pub fn with_roster(db: Arc<DatabaseConnection>, directory: Arc<dyn RosterDirectory>) -> Self {
        Self {
            configs: DistributionConfigRepository::new(db.clone()),
            opportunities: OpportunityRepository::new(db.clone()),
            roster: RosterView::new(directory),
            db,
        }
    }

    pub fn roster(&self) -> &RosterView {
        &self.roster
    }

    pub async fn assign(&self, request: AssignRequest) -> Result<AssignmentResult, DistributionError> {
        self.assign_at(request, Utc::now()).await
    }

    /// Assign as of `at`, which drives business hours and `assigned_at`.
    pub async fn assign_at(
        &self,
        request: AssignRequest,
        at: DateTime<Utc>,
    ) -> Result<AssignmentResult, DistributionError> {
        let opportunity = match self.opportunities.find(request.opportunity_id).await? {
            Some(opportunity) if opportunity.pipeline_id == request.pipeline_id => opportunity,
            _ => {
                return Err(DistributionError::OpportunityNotFound {
                    opportunity_id: request.opportunity_id,
                });
            }
        };
        if opportunity.stage_status.is_closed() {
            return Err(DistributionError::OpportunityClosed {
                opportunity_id: opportunity.id,
            });
        }

        let config = self
            .configs
            .get_or_default(opportunity.tenant_id, request.pipeline_id)
            .await?;

        if let Some(member_id) = request.explicit_member_id {
            return self
                .assign_explicit(&request, &opportunity, &config, member_id, at)
                .await;
        }

        if config.mode == DistributionMode::Manual {
            debug!(
                opportunity_id = %opportunity.id,
                pipeline_id = %request.pipeline_id,
                "Pipeline in manual mode; leaving lead for an administrator"
            );
            return self.queue_for_manual(&request, at).await;
        }

        let snapshot = self.roster.snapshot(&config, at).await?;
        let exclude = match request.trigger {
            AssignmentTrigger::SlaRedistribution => opportunity.responsible_member_id,
            AssignmentTrigger::NewLead => None,
        };
        let mode = match request.trigger {
            AssignmentTrigger::SlaRedistribution => AssignmentMode::SlaRedistribution,
            AssignmentTrigger::NewLead => AssignmentMode::RoundRobin,
        };

        let rotation = retry_on_stale_cursor(request.pipeline_id, || {
            self.rotate_and_write(&request, &opportunity, &snapshot, exclude, mode, at)
        })
        .await?;

        match rotation {
            Some(result) => Ok(result),
            None if config.fallback_to_manual => self.queue_for_manual(&request, at).await,
            None => {
                warn!(
                    pipeline_id = %request.pipeline_id,
                    opportunity_id = %request.opportunity_id,
                    "No eligible member and manual fallback disabled"
                );
                Err(DistributionError::NoAssigneeAvailable {
                    pipeline_id: request.pipeline_id,
                })
            }
        }
    }

    /// One rotation attempt. `Ok(None)` means nobody was eligible.
    async fn rotate_and_write(
        &self,
        request: &AssignRequest,
        opportunity: &opportunity::Model,
        snapshot: &RosterSnapshot,
        exclude: Option<Uuid>,
        mode: AssignmentMode,
        at: DateTime<Utc>,
    ) -> Result<Option<AssignmentResult>, DistributionError> {
        let txn = self.begin().await?;

        let member_id =
            match RoundRobinSelector::advance_in(&txn, request.pipeline_id, snapshot, exclude)
                .await
            {
                Ok(Selection::Selected(member_id)) => member_id,
                Ok(Selection::NoEligibleMember) => {
                    rollback(txn).await?;
                    return Ok(None);
                }
                Err(err) => {
                    rollback(txn).await?;
                    return Err(err);
                }
            };

        match write_assignment(&txn, request, opportunity.tenant_id, member_id, mode, at).await {
            Ok(Some(record)) => {
                commit(txn).await?;
                Ok(Some(self.assigned(record)))
            }
            Ok(None) => {
                rollback(txn).await?;
                Ok(Some(self.superseded(request)))
            }
            Err(err) => {
                rollback(txn).await?;
                Err(err)
            }
        }
    }

    async fn assign_explicit(
        &self,
        request: &AssignRequest,
        opportunity: &opportunity::Model,
        config: &distribution_config::Model,
        member_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<AssignmentResult, DistributionError> {
        let snapshot = self.roster.snapshot(config, at).await?;
        if !snapshot.is_linked(member_id) {
            return Err(DistributionError::MemberNotInPipeline {
                member_id,
                pipeline_id: request.pipeline_id,
            });
        }

        let mode = if opportunity.needs_manual_assignment {
            AssignmentMode::Fallback
        } else {
            AssignmentMode::Manual
        };

        let txn = self.begin().await?;
        match write_assignment(&txn, request, opportunity.tenant_id, member_id, mode, at).await {
            Ok(Some(record)) => {
                commit(txn).await?;
                Ok(self.assigned(record))
            }
            Ok(None) => {
                rollback(txn).await?;
                Ok(self.superseded(request))
            }
            Err(err) => {
                rollback(txn).await?;
                Err(err)
            }
        }
    }

    async fn queue_for_manual(
        &self,
        request: &AssignRequest,
        at: DateTime<Utc>,
    ) -> Result<AssignmentResult, DistributionError> {
        let tagged = self
            .opportunities
            .mark_needs_manual(request.opportunity_id, request.expected_version, at)
            .await?;
        if !tagged {
            return Ok(self.superseded(request));
        }

        counter!("distribution_manual_queue_total").increment(1);
        info!(
            opportunity_id = %request.opportunity_id,
            pipeline_id = %request.pipeline_id,
            "Lead needs manual assignment"
        );
        Ok(AssignmentResult::NeedsManualAssignment)
    }

    fn assigned(&self, record: assignment_record::Model) -> AssignmentResult {
        let metric_labels = vec![("mode", record.mode.as_str().to_string())];
        counter!("distribution_assignments_total", &metric_labels).increment(1);
        info!(
            opportunity_id = %record.opportunity_id,
            pipeline_id = %record.pipeline_id,
            member_id = %record.assigned_to,
            mode = record.mode.as_str(),
            sequence = record.redistribution_sequence,
            "Opportunity assigned"
        );

        AssignmentResult::Assigned {
            member_id: record.assigned_to,
            mode: record.mode,
            redistribution_sequence: record.redistribution_sequence,
            record_id: record.id,
        }
    }

    fn superseded(&self, request: &AssignRequest) -> AssignmentResult {
        debug!(
            opportunity_id = %request.opportunity_id,
            expected_version = ?request.expected_version,
            "Opportunity changed concurrently; assignment discarded"
        );
        AssignmentResult::Superseded
    }

    async fn begin(&self) -> Result<DatabaseTransaction, DistributionError> {
        self.db
            .begin()
            .await
            .map_err(|err| DistributionError::database("start assignment transaction", err))
    }
}

async fn commit(txn: DatabaseTransaction) -> Result<(), DistributionError> {
    txn.commit()
        .await
        .map_err(|err| DistributionError::database("commit assignment transaction", err))
}

async fn rollback(txn: DatabaseTransaction) -> Result<(), DistributionError> {
    txn.rollback()
        .await
        .map_err(|err| DistributionError::database("rollback assignment transaction", err))
}

/// Point the opportunity at `member_id` and append the history record.
///
/// Returns `None` without writing when the opportunity moved past the
/// request's expected version.
async fn write_assignment<C: ConnectionTrait>(
    conn: &C,
    request: &AssignRequest,
    tenant_id: Uuid,
    member_id: Uuid,
    mode: AssignmentMode,
    at: DateTime<Utc>,
) -> Result<Option<assignment_record::Model>, DistributionError> {
    let current = Opportunity::find_by_id(request.opportunity_id)
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(|err| DistributionError::database("load opportunity for assignment", err))?
        .ok_or(DistributionError::OpportunityNotFound {
            opportunity_id: request.opportunity_id,
        })?;

    if current.stage_status.is_closed() {
        return Err(DistributionError::OpportunityClosed {
            opportunity_id: current.id,
        });
    }
    if request
        .expected_version
        .is_some_and(|version| version != current.assignment_version)
    {
        return Ok(None);
    }

    let is_redistribution = request.trigger == AssignmentTrigger::SlaRedistribution;
    let previous = count_redistributions(conn, current.id).await?;
    let sequence = previous + u64::from(is_redistribution);

    let assigned_at = at.fixed_offset();
    let mut update = Opportunity::update_many()
        .col_expr(Column::ResponsibleMemberId, Expr::value(Some(member_id)))
        .col_expr(Column::AssignedAt, Expr::value(Some(assigned_at)))
        .col_expr(
            Column::SlaCheckedAt,
            Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
        )
        .col_expr(Column::NeedsManualAssignment, Expr::value(false))
        .col_expr(
            Column::AssignmentVersion,
            Expr::value(current.assignment_version + 1),
        )
        .col_expr(Column::UpdatedAt, Expr::value(assigned_at));
    if is_redistribution {
        update = update.col_expr(
            Column::FirstContactAt,
            Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
        );
    }

    let result = update
        .filter(Column::Id.eq(current.id))
        .filter(Column::AssignmentVersion.eq(current.assignment_version))
        .filter(Column::StageStatus.eq(StageStatus::Open))
        .exec(conn)
        .await
        .map_err(|err| DistributionError::database("update opportunity owner", err))?;

    if result.rows_affected == 0 {
        return Ok(None);
    }

    let reason = request.reason.clone().or_else(|| {
        is_redistribution.then(|| SLA_TIMEOUT_REASON.to_string())
    });

    let record = assignment_record::Model {
        id: Uuid::new_v4(),
        tenant_id,
        pipeline_id: request.pipeline_id,
        opportunity_id: current.id,
        assigned_to: member_id,
        assigned_at,
        mode,
        redistribution_sequence: i32::try_from(sequence).unwrap_or(i32::MAX),
        reason,
        created_at: Utc::now().fixed_offset(),
    };

    append(conn, record).await.map(Some)
}
