//! Migration to create the distribution_configs table.
//!
//! One row per pipeline holding the distribution mode, business-hours window,
//! roster flags and SLA redistribution parameters.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DistributionConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DistributionConfigs::PipelineId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DistributionConfigs::TenantId).uuid().not_null())
                    .col(
                        ColumnDef::new(DistributionConfigs::Mode)
                            .text()
                            .not_null()
                            .default("manual"),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::BusinessHoursOnly)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(DistributionConfigs::StartTime).time().not_null())
                    .col(ColumnDef::new(DistributionConfigs::EndTime).time().not_null())
                    .col(
                        ColumnDef::new(DistributionConfigs::WeekdaysMask)
                            .small_integer()
                            .not_null()
                            .default(62),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::UtcOffsetMinutes)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::SkipInactiveMembers)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::FallbackToManual)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::SlaEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::SlaMinutes)
                            .integer()
                            .not_null()
                            .default(30),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::SlaMaxRedistributions)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::SlaLimitAction)
                            .text()
                            .not_null()
                            .default("keep_last_assignee"),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DistributionConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // The SLA monitor walks only pipelines with SLA switched on
        manager
            .create_index(
                Index::create()
                    .name("idx_distribution_configs_sla_enabled")
                    .table(DistributionConfigs::Table)
                    .col(DistributionConfigs::SlaEnabled)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_distribution_configs_sla_enabled")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DistributionConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DistributionConfigs {
    Table,
    PipelineId,
    TenantId,
    Mode,
    BusinessHoursOnly,
    StartTime,
    EndTime,
    WeekdaysMask,
    UtcOffsetMinutes,
    SkipInactiveMembers,
    FallbackToManual,
    SlaEnabled,
    SlaMinutes,
    SlaMaxRedistributions,
    SlaLimitAction,
    CreatedAt,
    UpdatedAt,
}
