//! # Assignment Record Repository
//!
//! Append-only distribution history. Records are written inside the assignment
//! transaction (see [`append`]) and never updated afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::DistributionError;
use crate::models::assignment_record::{
    self, ActiveModel, AssignmentMode, Column, Entity as AssignmentRecord,
};

/// Number of SLA redistributions already recorded for an opportunity.
pub async fn count_redistributions<C: ConnectionTrait>(
    conn: &C,
    opportunity_id: Uuid,
) -> Result<u64, DistributionError> {
    AssignmentRecord::find()
        .filter(Column::OpportunityId.eq(opportunity_id))
        .filter(Column::Mode.eq(AssignmentMode::SlaRedistribution))
        .count(conn)
        .await
        .map_err(|err| DistributionError::database("count SLA redistributions", err))
}

/// Insert a history row on the given connection or transaction.
pub async fn append<C: ConnectionTrait>(
    conn: &C,
    record: assignment_record::Model,
) -> Result<assignment_record::Model, DistributionError> {
    let active = ActiveModel {
        id: Set(record.id),
        tenant_id: Set(record.tenant_id),
        pipeline_id: Set(record.pipeline_id),
        opportunity_id: Set(record.opportunity_id),
        assigned_to: Set(record.assigned_to),
        assigned_at: Set(record.assigned_at),
        mode: Set(record.mode),
        redistribution_sequence: Set(record.redistribution_sequence),
        reason: Set(record.reason.clone()),
        created_at: Set(record.created_at),
    };

    AssignmentRecord::insert(active)
        .exec_without_returning(conn)
        .await
        .map_err(|err| DistributionError::database("insert assignment record", err))?;

    Ok(record)
}

/// Read side of the distribution history
#[derive(Debug, Clone)]
pub struct AssignmentRecordRepository {
    db: Arc<DatabaseConnection>,
}

impl AssignmentRecordRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Full history of one opportunity, oldest first
    pub async fn list_for_opportunity(
        &self,
        opportunity_id: Uuid,
    ) -> Result<Vec<assignment_record::Model>, DistributionError> {
        AssignmentRecord::find()
            .filter(Column::OpportunityId.eq(opportunity_id))
            .order_by_asc(Column::AssignedAt)
            .order_by_asc(Column::RedistributionSequence)
            .all(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("list assignment history", err))
    }

    pub async fn count_redistributions(
        &self,
        opportunity_id: Uuid,
    ) -> Result<u64, DistributionError> {
        count_redistributions(self.db.as_ref(), opportunity_id).await
    }

    /// Most recent records of a pipeline, optionally narrowed to one mode
    pub async fn list_for_pipeline(
        &self,
        pipeline_id: Uuid,
        mode: Option<AssignmentMode>,
        limit: u64,
    ) -> Result<Vec<assignment_record::Model>, DistributionError> {
        let mut query = AssignmentRecord::find().filter(Column::PipelineId.eq(pipeline_id));
        if let Some(mode) = mode {
            query = query.filter(Column::Mode.eq(mode));
        }

        query
            .order_by_desc(Column::AssignedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("list pipeline assignments", err))
    }

    /// Assignments per member in a pipeline since `since`, for fairness reports
    pub async fn counts_by_member(
        &self,
        pipeline_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<HashMap<Uuid, u64>, DistributionError> {
        let rows: Vec<(Uuid, i64)> = AssignmentRecord::find()
            .select_only()
            .column(Column::AssignedTo)
            .column_as(Expr::col(Column::Id).count(), "assignments")
            .filter(Column::PipelineId.eq(pipeline_id))
            .filter(Column::AssignedAt.gte(since.fixed_offset()))
            .group_by(Column::AssignedTo)
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("count assignments by member", err))?;

        Ok(rows
            .into_iter()
            .map(|(member_id, count)| (member_id, count.max(0) as u64))
            .collect())
    }
}
