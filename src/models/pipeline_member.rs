//! PipelineMember entity model
//!
//! Roster link between a pipeline and a sales rep, owned by the roster
//! collaborator.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pipeline_members")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub pipeline_id: Uuid,

    #[sea_orm(primary_key, auto_increment = false)]
    pub member_id: Uuid,

    /// Join order; new members enter the rotation in this order
    pub position: i32,

    pub is_active: bool,

    /// Administratively excluded from automatic distribution
    pub is_excluded: bool,

    pub joined_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
