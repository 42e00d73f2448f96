//! Opportunity assignment projection
//!
//! The subset of the opportunity record this crate reads and writes: who owns
//! the lead, when they got it, whether they have made first contact, and the
//! SLA bookkeeping flags.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "opportunities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub pipeline_id: Uuid,

    pub stage_status: StageStatus,

    pub responsible_member_id: Option<Uuid>,

    /// Reset on every (re)assignment; the SLA timer runs from here
    pub assigned_at: Option<DateTimeWithTimeZone>,

    /// Last SLA claim on the current assignment; cleared by every (re)assignment
    pub sla_checked_at: Option<DateTimeWithTimeZone>,

    /// Set once by the messaging collaborator
    pub first_contact_at: Option<DateTimeWithTimeZone>,

    /// Redistribution budget spent and limit action applied; terminal
    pub sla_exhausted: bool,

    /// Waiting in the admin queue for a manual pick
    pub needs_manual_assignment: bool,

    /// Bumped by every write to the projection; the SLA claim compares it
    pub assignment_version: i64,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// Coarse stage classification. Won and lost opportunities are frozen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[sea_orm(string_value = "open")]
    #[default]
    Open,

    #[sea_orm(string_value = "won")]
    Won,

    #[sea_orm(string_value = "lost")]
    Lost,
}

impl StageStatus {
    pub fn is_closed(self) -> bool {
        !matches!(self, StageStatus::Open)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::assignment_record::Entity")]
    AssignmentRecords,
}

impl Related<super::assignment_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssignmentRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
