//! Test utilities for database testing.
//!
//! In-memory SQLite databases with migrations applied, plus fixtures for
//! pipelines, rosters and leads.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveTime, Utc};
use leadflow::models::distribution_config::{self, DistributionMode, SlaLimitAction};
use leadflow::repositories::{
    DistributionConfigRepository, OpportunityRepository, PipelineMemberRepository,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Sets up an in-memory SQLite database with all migrations applied and returns an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(db))
}

/// Parse an RFC 3339 timestamp.
pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

/// A pipeline with its configuration saved and members linked in order.
pub struct TestPipeline {
    pub tenant_id: Uuid,
    pub pipeline_id: Uuid,
    pub members: Vec<Uuid>,
}

/// Round-robin configuration without business hours or SLA.
pub fn round_robin_config(tenant_id: Uuid, pipeline_id: Uuid) -> distribution_config::Model {
    let mut config = distribution_config::Model::defaults_for(tenant_id, pipeline_id);
    config.mode = DistributionMode::RoundRobin;
    config
}

/// Round-robin configuration with the SLA enabled.
pub fn sla_config(
    tenant_id: Uuid,
    pipeline_id: Uuid,
    sla_minutes: i32,
    max_redistributions: i32,
    limit_action: SlaLimitAction,
) -> distribution_config::Model {
    let mut config = round_robin_config(tenant_id, pipeline_id);
    config.sla_enabled = true;
    config.sla_minutes = sla_minutes;
    config.sla_max_redistributions = max_redistributions;
    config.sla_limit_action = limit_action;
    config
}

/// Weekday 09:00-18:00 UTC business hours.
pub fn with_business_hours(mut config: distribution_config::Model) -> distribution_config::Model {
    config.business_hours_only = true;
    config.start_time = NaiveTime::from_hms_opt(9, 0, 0).expect("valid time");
    config.end_time = NaiveTime::from_hms_opt(18, 0, 0).expect("valid time");
    config.set_weekdays([1, 2, 3, 4, 5]);
    config
}

/// Save `config` and link `member_count` fresh members in join order.
pub async fn create_pipeline(
    db: &Arc<DatabaseConnection>,
    config: distribution_config::Model,
    member_count: usize,
) -> Result<TestPipeline> {
    let tenant_id = config.tenant_id;
    let pipeline_id = config.pipeline_id;
    DistributionConfigRepository::new(db.clone())
        .upsert(config)
        .await?;

    let roster = PipelineMemberRepository::new(db.clone());
    let mut members = Vec::with_capacity(member_count);
    for _ in 0..member_count {
        let member_id = Uuid::new_v4();
        roster.add_member(pipeline_id, member_id).await?;
        members.push(member_id);
    }

    Ok(TestPipeline {
        tenant_id,
        pipeline_id,
        members,
    })
}

/// Create an open, unassigned lead in the pipeline.
pub async fn create_lead(db: &Arc<DatabaseConnection>, pipeline: &TestPipeline) -> Result<Uuid> {
    let lead = OpportunityRepository::new(db.clone())
        .create_lead(pipeline.tenant_id, pipeline.pipeline_id)
        .await?;
    Ok(lead.id)
}
