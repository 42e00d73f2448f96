//! Migration to create the assignment_records table (distribution history).
//!
//! Append-only audit trail of every assignment. Rows are never updated.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AssignmentRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AssignmentRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AssignmentRecords::TenantId).uuid().not_null())
                    .col(ColumnDef::new(AssignmentRecords::PipelineId).uuid().not_null())
                    .col(
                        ColumnDef::new(AssignmentRecords::OpportunityId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AssignmentRecords::AssignedTo).uuid().not_null())
                    .col(
                        ColumnDef::new(AssignmentRecords::AssignedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AssignmentRecords::Mode).text().not_null())
                    .col(
                        ColumnDef::new(AssignmentRecords::RedistributionSequence)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(AssignmentRecords::Reason).text().null())
                    .col(
                        ColumnDef::new(AssignmentRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_assignment_records_opportunity_id")
                            .from(AssignmentRecords::Table, AssignmentRecords::OpportunityId)
                            .to(Opportunities::Table, Opportunities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_assignment_records_opportunity_mode")
                    .table(AssignmentRecords::Table)
                    .col(AssignmentRecords::OpportunityId)
                    .col(AssignmentRecords::Mode)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_assignment_records_pipeline_assigned_at")
                    .table(AssignmentRecords::Table)
                    .col(AssignmentRecords::PipelineId)
                    .col(AssignmentRecords::AssignedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_assignment_records_opportunity_mode")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_assignment_records_pipeline_assigned_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(AssignmentRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AssignmentRecords {
    Table,
    Id,
    TenantId,
    PipelineId,
    OpportunityId,
    AssignedTo,
    AssignedAt,
    Mode,
    RedistributionSequence,
    Reason,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Opportunities {
    Table,
    Id,
}
