//! AssignmentRecord entity model
//!
//! Append-only distribution history ("historico de distribuicao"). One row per
//! assignment; the count of `sla_redistribution` rows is the redistribution
//! state of an opportunity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assignment_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub pipeline_id: Uuid,

    pub opportunity_id: Uuid,

    /// Member the opportunity was assigned to
    pub assigned_to: Uuid,

    pub assigned_at: DateTimeWithTimeZone,

    pub mode: AssignmentMode,

    /// 0 for the original assignment, N after the Nth SLA redistribution
    pub redistribution_sequence: i32,

    /// Free-text cause, e.g. `sla_timeout`
    pub reason: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

/// How an assignment came about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    #[sea_orm(string_value = "manual")]
    Manual,

    #[sea_orm(string_value = "round_robin")]
    RoundRobin,

    #[sea_orm(string_value = "sla_redistribution")]
    SlaRedistribution,

    #[sea_orm(string_value = "fallback")]
    Fallback,
}

impl AssignmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentMode::Manual => "manual",
            AssignmentMode::RoundRobin => "round_robin",
            AssignmentMode::SlaRedistribution => "sla_redistribution",
            AssignmentMode::Fallback => "fallback",
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::opportunity::Entity",
        from = "Column::OpportunityId",
        to = "super::opportunity::Column::Id"
    )]
    Opportunity,
}

impl Related<super::opportunity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Opportunity.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
