//! Database migrations for the lead distribution core.
//!
//! Each migration owns one table of the distribution schema. They are applied in
//! order by [`Migrator`] at service start (`leadflow migrate`) and by the tests.

pub use sea_orm_migration::prelude::*;

mod m2025_06_02_090000_create_distribution_configs;
mod m2025_06_02_090100_create_pipeline_members;
mod m2025_06_02_090200_create_rotation_cursors;
mod m2025_06_02_090300_create_opportunities;
mod m2025_06_02_090400_create_assignment_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_02_090000_create_distribution_configs::Migration),
            Box::new(m2025_06_02_090100_create_pipeline_members::Migration),
            Box::new(m2025_06_02_090200_create_rotation_cursors::Migration),
            Box::new(m2025_06_02_090300_create_opportunities::Migration),
            Box::new(m2025_06_02_090400_create_assignment_records::Migration),
        ]
    }
}
