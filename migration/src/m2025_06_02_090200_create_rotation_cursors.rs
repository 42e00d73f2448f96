//! Migration to create the rotation_cursors table.
//!
//! One row per pipeline. `version` is the optimistic-concurrency field checked
//! on every round-robin advance.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RotationCursors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RotationCursors::PipelineId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RotationCursors::OrderedMemberIds)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RotationCursors::LastAssignedIndex)
                            .integer()
                            .not_null()
                            .default(-1),
                    )
                    .col(
                        ColumnDef::new(RotationCursors::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RotationCursors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RotationCursors::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RotationCursors {
    Table,
    PipelineId,
    OrderedMemberIds,
    LastAssignedIndex,
    Version,
    UpdatedAt,
}
