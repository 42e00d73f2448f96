//! SLA redistribution state machine.
//!
//! The state of an opportunity is the number of `sla_redistribution` records in
//! its history. Below the pipeline's limit an overdue opportunity is handed to
//! the next member of the rotation; at the limit the configured limit action is
//! applied once and the opportunity is marked exhausted for good.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::distribution::assignment::{AssignRequest, AssignmentResult, AssignmentService};
use crate::error::DistributionError;
use crate::models::distribution_config::SlaLimitAction;
use crate::repositories::{
    AssignmentRecordRepository, DistributionConfigRepository, OpportunityRepository,
};

/// What the state machine did with a claimed opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedistributionAction {
    /// Handed to another member; `sequence` is the redistribution count after it
    Redistributed { member_id: Uuid, sequence: i32 },
    /// Nobody eligible; tagged for manual pickup and left with its owner
    QueuedForManual,
    /// Limit reached; the action was applied and the opportunity is exhausted
    LimitApplied(SlaLimitAction),
    /// The opportunity changed after the claim; nothing was done
    Discarded,
}

#[derive(Clone)]
pub struct RedistributionStateMachine {
    configs: DistributionConfigRepository,
    opportunities: OpportunityRepository,
    records: AssignmentRecordRepository,
    assignments: AssignmentService,
}

impl RedistributionStateMachine {
    pub fn new(db: Arc<DatabaseConnection>, assignments: AssignmentService) -> Self {
        Self {
            configs: DistributionConfigRepository::new(db.clone()),
            opportunities: OpportunityRepository::new(db.clone()),
            records: AssignmentRecordRepository::new(db),
            assignments,
        }
    }

    /// Decide the fate of an opportunity the caller has claimed at
    /// `claimed_version`.
    pub async fn decide(
        &self,
        opportunity_id: Uuid,
        pipeline_id: Uuid,
        claimed_version: i64,
        now: DateTime<Utc>,
    ) -> Result<RedistributionAction, DistributionError> {
        let Some(opportunity) = self.opportunities.find(opportunity_id).await? else {
            return Err(DistributionError::OpportunityNotFound { opportunity_id });
        };
        if opportunity.assignment_version != claimed_version
            || opportunity.sla_exhausted
            || opportunity.stage_status.is_closed()
            || opportunity.first_contact_at.is_some()
        {
            debug!(
                opportunity_id = %opportunity_id,
                claimed_version,
                current_version = opportunity.assignment_version,
                "Opportunity changed after SLA claim; decision discarded"
            );
            return Ok(RedistributionAction::Discarded);
        }

        let config = self
            .configs
            .get_or_default(opportunity.tenant_id, pipeline_id)
            .await?;
        let redistributions = self.records.count_redistributions(opportunity_id).await?;
        let limit = u64::try_from(config.sla_max_redistributions).unwrap_or(0);

        if redistributions < limit {
            let request =
                AssignRequest::sla_redistribution(opportunity_id, pipeline_id, claimed_version);
            let action = match self.assignments.assign_at(request, now).await? {
                AssignmentResult::Assigned {
                    member_id,
                    redistribution_sequence,
                    ..
                } => RedistributionAction::Redistributed {
                    member_id,
                    sequence: redistribution_sequence,
                },
                AssignmentResult::NeedsManualAssignment => {
                    // Does not consume the budget; rechecked after another window.
                    counter!("sla_manual_requeues_total").increment(1);
                    info!(
                        opportunity_id = %opportunity_id,
                        pipeline_id = %pipeline_id,
                        redistributions,
                        limit,
                        "SLA timeout re-queued for manual pickup without a redistribution"
                    );
                    RedistributionAction::QueuedForManual
                }
                AssignmentResult::Superseded => RedistributionAction::Discarded,
            };
            return Ok(action);
        }

        let action = config.sla_limit_action;
        let applied = self
            .opportunities
            .apply_limit_action(opportunity_id, action, claimed_version, now)
            .await?;
        if !applied {
            return Ok(RedistributionAction::Discarded);
        }

        let metric_labels = vec![("action", limit_action_label(action).to_string())];
        counter!("sla_limit_actions_total", &metric_labels).increment(1);
        info!(
            opportunity_id = %opportunity_id,
            pipeline_id = %pipeline_id,
            redistributions,
            action = limit_action_label(action),
            "SLA redistribution limit reached; opportunity exhausted"
        );

        Ok(RedistributionAction::LimitApplied(action))
    }
}

fn limit_action_label(action: SlaLimitAction) -> &'static str {
    match action {
        SlaLimitAction::KeepLastAssignee => "keep_last_assignee",
        SlaLimitAction::ReturnToAdminQueue => "return_to_admin_queue",
        SlaLimitAction::Unassign => "unassign",
    }
}
