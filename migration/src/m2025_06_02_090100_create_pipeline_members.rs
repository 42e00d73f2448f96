//! Migration to create the pipeline_members table.
//!
//! Roster links between pipelines and sales reps, maintained by the roster
//! collaborator. `position` fixes the rotation order members join with.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PipelineMembers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PipelineMembers::PipelineId).uuid().not_null())
                    .col(ColumnDef::new(PipelineMembers::MemberId).uuid().not_null())
                    .col(ColumnDef::new(PipelineMembers::Position).integer().not_null())
                    .col(
                        ColumnDef::new(PipelineMembers::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(PipelineMembers::IsExcluded)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PipelineMembers::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PipelineMembers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(PipelineMembers::PipelineId)
                            .col(PipelineMembers::MemberId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PipelineMembers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PipelineMembers {
    Table,
    PipelineId,
    MemberId,
    Position,
    IsActive,
    IsExcluded,
    JoinedAt,
    UpdatedAt,
}
