//! RotationCursor entity model
//!
//! Per-pipeline round-robin position. Only the round-robin selector reads or
//! writes these rows.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rotation_cursors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub pipeline_id: Uuid,

    /// JSON array of member UUIDs in stable rotation order
    #[sea_orm(column_type = "JsonBinary")]
    pub ordered_member_ids: JsonValue,

    /// Position of the last member picked; -1 before the first pick
    pub last_assigned_index: i32,

    /// Optimistic-concurrency version, incremented on every advance
    pub version: i64,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the rotation order. Entries that are not UUIDs are dropped.
    pub fn member_ids(&self) -> Vec<Uuid> {
        decode_member_ids(&self.ordered_member_ids)
    }
}

pub fn decode_member_ids(value: &JsonValue) -> Vec<Uuid> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str())
                .filter_map(|raw| Uuid::parse_str(raw).ok())
                .collect()
        })
        .unwrap_or_default()
}

pub fn encode_member_ids(ids: &[Uuid]) -> JsonValue {
    JsonValue::Array(
        ids.iter()
            .map(|id| JsonValue::String(id.to_string()))
            .collect(),
    )
}
