//! # Distribution Config Repository
//!
//! Reads and writes per-pipeline [`distribution_config::Model`] rows. Writes are
//! validated first so the assignment and SLA paths never see an invalid config.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use tracing::info;
use uuid::Uuid;

use crate::error::DistributionError;
use crate::models::distribution_config::{self, Column, Entity as DistributionConfig};

/// Repository for distribution configuration rows
#[derive(Debug, Clone)]
pub struct DistributionConfigRepository {
    db: Arc<DatabaseConnection>,
}

impl DistributionConfigRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Get the stored configuration for a pipeline
    pub async fn get(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Option<distribution_config::Model>, DistributionError> {
        DistributionConfig::find_by_id(pipeline_id)
            .one(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("load distribution config", err))
    }

    /// Get the stored configuration, or the defaults a pipeline without one
    /// behaves with (manual mode, SLA disabled). Nothing is written.
    pub async fn get_or_default(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
    ) -> Result<distribution_config::Model, DistributionError> {
        Ok(self
            .get(pipeline_id)
            .await?
            .unwrap_or_else(|| distribution_config::Model::defaults_for(tenant_id, pipeline_id)))
    }

    /// Create or replace a pipeline's configuration.
    ///
    /// Rejects the write with [`DistributionError::ConfigInvalid`] when the
    /// configuration fails validation; the stored row is left untouched.
    pub async fn upsert(
        &self,
        config: distribution_config::Model,
    ) -> Result<distribution_config::Model, DistributionError> {
        config.validate()?;

        let now = Utc::now().fixed_offset();
        let existing = self.get(config.pipeline_id).await?;

        let saved = match existing {
            Some(current) => {
                let mut active = current.into_active_model();
                active.tenant_id = Set(config.tenant_id);
                active.mode = Set(config.mode);
                active.business_hours_only = Set(config.business_hours_only);
                active.start_time = Set(config.start_time);
                active.end_time = Set(config.end_time);
                active.weekdays_mask = Set(config.weekdays_mask);
                active.utc_offset_minutes = Set(config.utc_offset_minutes);
                active.skip_inactive_members = Set(config.skip_inactive_members);
                active.fallback_to_manual = Set(config.fallback_to_manual);
                active.sla_enabled = Set(config.sla_enabled);
                active.sla_minutes = Set(config.sla_minutes);
                active.sla_max_redistributions = Set(config.sla_max_redistributions);
                active.sla_limit_action = Set(config.sla_limit_action);
                active.updated_at = Set(now);
                active
                    .update(self.db.as_ref())
                    .await
                    .map_err(|err| DistributionError::database("update distribution config", err))?
            }
            None => {
                let saved = distribution_config::Model {
                    created_at: now,
                    updated_at: now,
                    ..config
                };
                let active = distribution_config::ActiveModel {
                    pipeline_id: Set(saved.pipeline_id),
                    tenant_id: Set(saved.tenant_id),
                    mode: Set(saved.mode),
                    business_hours_only: Set(saved.business_hours_only),
                    start_time: Set(saved.start_time),
                    end_time: Set(saved.end_time),
                    weekdays_mask: Set(saved.weekdays_mask),
                    utc_offset_minutes: Set(saved.utc_offset_minutes),
                    skip_inactive_members: Set(saved.skip_inactive_members),
                    fallback_to_manual: Set(saved.fallback_to_manual),
                    sla_enabled: Set(saved.sla_enabled),
                    sla_minutes: Set(saved.sla_minutes),
                    sla_max_redistributions: Set(saved.sla_max_redistributions),
                    sla_limit_action: Set(saved.sla_limit_action),
                    created_at: Set(saved.created_at),
                    updated_at: Set(saved.updated_at),
                };
                DistributionConfig::insert(active)
                    .exec_without_returning(self.db.as_ref())
                    .await
                    .map_err(|err| DistributionError::database("insert distribution config", err))?;
                saved
            }
        };

        info!(
            pipeline_id = %saved.pipeline_id,
            tenant_id = %saved.tenant_id,
            mode = ?saved.mode,
            sla_enabled = saved.sla_enabled,
            "Distribution config saved"
        );

        Ok(saved)
    }

    /// Pipelines whose SLA timer is switched on, oldest configuration first
    pub async fn list_sla_enabled(
        &self,
    ) -> Result<Vec<distribution_config::Model>, DistributionError> {
        DistributionConfig::find()
            .filter(Column::SlaEnabled.eq(true))
            .order_by_asc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("list SLA-enabled pipelines", err))
    }
}
