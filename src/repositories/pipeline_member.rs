//! # Pipeline Member Repository
//!
//! Roster maintenance for the members linked to a pipeline. The roster
//! collaborator owns these rows; the distribution core only reads them through
//! [`RosterDirectory`](crate::distribution::roster::RosterDirectory).

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::info;
use uuid::Uuid;

use crate::error::DistributionError;
use crate::models::pipeline_member::{self, ActiveModel, Column, Entity as PipelineMember};

/// Repository for pipeline roster rows
#[derive(Debug, Clone)]
pub struct PipelineMemberRepository {
    db: Arc<DatabaseConnection>,
}

impl PipelineMemberRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Link a member to a pipeline at the end of the join order.
    ///
    /// Linking an already-linked member returns the existing row unchanged.
    pub async fn add_member(
        &self,
        pipeline_id: Uuid,
        member_id: Uuid,
    ) -> Result<pipeline_member::Model, DistributionError> {
        if let Some(existing) = self.find(pipeline_id, member_id).await? {
            return Ok(existing);
        }

        let last_position = PipelineMember::find()
            .select_only()
            .column_as(Expr::col(Column::Position).max(), "max_position")
            .filter(Column::PipelineId.eq(pipeline_id))
            .into_tuple::<Option<i32>>()
            .one(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("load roster positions", err))?
            .flatten();

        let now = Utc::now().fixed_offset();
        let member = ActiveModel {
            pipeline_id: Set(pipeline_id),
            member_id: Set(member_id),
            position: Set(last_position.map_or(0, |position| position + 1)),
            is_active: Set(true),
            is_excluded: Set(false),
            joined_at: Set(now),
            updated_at: Set(now),
        };

        PipelineMember::insert(member)
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("insert pipeline member", err))?;

        info!(
            pipeline_id = %pipeline_id,
            member_id = %member_id,
            "Member linked to pipeline"
        );

        self.find(pipeline_id, member_id)
            .await?
            .ok_or(DistributionError::MemberNotInPipeline {
                member_id,
                pipeline_id,
            })
    }

    /// Unlink a member. Returns whether a row was removed.
    pub async fn remove_member(
        &self,
        pipeline_id: Uuid,
        member_id: Uuid,
    ) -> Result<bool, DistributionError> {
        let result = PipelineMember::delete_many()
            .filter(Column::PipelineId.eq(pipeline_id))
            .filter(Column::MemberId.eq(member_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("remove pipeline member", err))?;

        Ok(result.rows_affected > 0)
    }

    /// Record the roster's active/inactive status for a member
    pub async fn set_active(
        &self,
        pipeline_id: Uuid,
        member_id: Uuid,
        is_active: bool,
    ) -> Result<bool, DistributionError> {
        self.update_flag(pipeline_id, member_id, Column::IsActive, is_active)
            .await
    }

    /// Exclude a member from (or return them to) automatic distribution
    pub async fn set_excluded(
        &self,
        pipeline_id: Uuid,
        member_id: Uuid,
        is_excluded: bool,
    ) -> Result<bool, DistributionError> {
        self.update_flag(pipeline_id, member_id, Column::IsExcluded, is_excluded)
            .await
    }

    pub async fn find(
        &self,
        pipeline_id: Uuid,
        member_id: Uuid,
    ) -> Result<Option<pipeline_member::Model>, DistributionError> {
        PipelineMember::find_by_id((pipeline_id, member_id))
            .one(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("load pipeline member", err))
    }

    /// Members linked to a pipeline in join order
    pub async fn list(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Vec<pipeline_member::Model>, DistributionError> {
        PipelineMember::find()
            .filter(Column::PipelineId.eq(pipeline_id))
            .order_by_asc(Column::Position)
            .order_by_asc(Column::JoinedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("list pipeline members", err))
    }

    async fn update_flag(
        &self,
        pipeline_id: Uuid,
        member_id: Uuid,
        column: Column,
        value: bool,
    ) -> Result<bool, DistributionError> {
        let result = PipelineMember::update_many()
            .col_expr(column, Expr::value(value))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::PipelineId.eq(pipeline_id))
            .filter(Column::MemberId.eq(member_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("update pipeline member", err))?;

        Ok(result.rows_affected > 0)
    }
}
