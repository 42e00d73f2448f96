//! Roster view: which linked members may receive a lead right now.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DistributionError;
use crate::models::distribution_config;
use crate::repositories::PipelineMemberRepository;

/// One member as the roster collaborator reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterMember {
    pub member_id: Uuid,
    pub is_active: bool,
    pub is_excluded: bool,
}

/// Source of pipeline membership. The roster itself is owned elsewhere.
#[async_trait]
pub trait RosterDirectory: Send + Sync {
    /// Members linked to the pipeline, in join order
    async fn pipeline_members(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Vec<RosterMember>, DistributionError>;
}

#[async_trait]
impl RosterDirectory for PipelineMemberRepository {
    async fn pipeline_members(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Vec<RosterMember>, DistributionError> {
        let members = self.list(pipeline_id).await?;
        Ok(members
            .into_iter()
            .map(|member| RosterMember {
                member_id: member.member_id,
                is_active: member.is_active,
                is_excluded: member.is_excluded,
            })
            .collect())
    }
}

/// Roster state at one instant, already filtered by the pipeline's rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    /// Every member currently linked, in join order
    pub linked: Vec<Uuid>,
    /// Members that may receive an automatic assignment now
    pub eligible: Vec<Uuid>,
}

impl RosterSnapshot {
    pub fn is_linked(&self, member_id: Uuid) -> bool {
        self.linked.contains(&member_id)
    }

    pub fn is_eligible(&self, member_id: Uuid) -> bool {
        self.eligible.contains(&member_id)
    }

    /// Apply the pipeline's eligibility rules to a raw member list.
    ///
    /// Outside business hours nobody is eligible. Excluded members never are;
    /// inactive members are dropped only when the pipeline skips them.
    pub fn build(
        members: &[RosterMember],
        config: &distribution_config::Model,
        at: DateTime<Utc>,
    ) -> Self {
        let linked = members.iter().map(|member| member.member_id).collect();
        let eligible = if config.is_within_business_hours(at) {
            members
                .iter()
                .filter(|member| !member.is_excluded)
                .filter(|member| member.is_active || !config.skip_inactive_members)
                .map(|member| member.member_id)
                .collect()
        } else {
            Vec::new()
        };

        Self { linked, eligible }
    }
}

/// Read-only view over the roster directory
#[derive(Clone)]
pub struct RosterView {
    directory: Arc<dyn RosterDirectory>,
}

impl RosterView {
    pub fn new(directory: Arc<dyn RosterDirectory>) -> Self {
        Self { directory }
    }

    /// Snapshot of linked and eligible members for `config`'s pipeline at `at`
    pub async fn snapshot(
        &self,
        config: &distribution_config::Model,
        at: DateTime<Utc>,
    ) -> Result<RosterSnapshot, DistributionError> {
        let members = self.directory.pipeline_members(config.pipeline_id).await?;
        Ok(RosterSnapshot::build(&members, config, at))
    }

    /// Eligible members only
    pub async fn eligible_members(
        &self,
        config: &distribution_config::Model,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DistributionError> {
        Ok(self.snapshot(config, at).await?.eligible)
    }
}
