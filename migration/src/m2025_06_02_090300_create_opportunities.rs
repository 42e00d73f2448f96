//! Migration to create the opportunities table.
//!
//! Only the assignment projection lives here; the pipeline CRUD layer owns the
//! remaining opportunity columns in production schemas.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Opportunities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Opportunities::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Opportunities::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Opportunities::PipelineId).uuid().not_null())
                    .col(
                        ColumnDef::new(Opportunities::StageStatus)
                            .text()
                            .not_null()
                            .default("open"),
                    )
                    .col(ColumnDef::new(Opportunities::ResponsibleMemberId).uuid().null())
                    .col(
                        ColumnDef::new(Opportunities::AssignedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Opportunities::SlaCheckedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Opportunities::FirstContactAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Opportunities::SlaExhausted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Opportunities::NeedsManualAssignment)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Opportunities::AssignmentVersion)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Opportunities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Opportunities::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Covers the SLA candidate scan per pipeline
        manager
            .create_index(
                Index::create()
                    .name("idx_opportunities_sla_candidates")
                    .table(Opportunities::Table)
                    .col(Opportunities::PipelineId)
                    .col(Opportunities::StageStatus)
                    .col(Opportunities::SlaExhausted)
                    .col(Opportunities::AssignedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_opportunities_sla_candidates")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Opportunities::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Opportunities {
    Table,
    Id,
    TenantId,
    PipelineId,
    StageStatus,
    ResponsibleMemberId,
    AssignedAt,
    SlaCheckedAt,
    FirstContactAt,
    SlaExhausted,
    NeedsManualAssignment,
    AssignmentVersion,
    CreatedAt,
    UpdatedAt,
}
