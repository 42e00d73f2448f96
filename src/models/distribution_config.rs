//! # Distribution Configuration Model
//!
//! Per-pipeline settings that drive every assignment and SLA decision: the
//! distribution mode, the business-hours window, roster flags and the SLA
//! redistribution parameters.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::DistributionError;

/// Weekdays Monday through Friday (bit 0 is Sunday).
pub const WEEKDAYS_MON_FRI: i16 = 0b0011_1110;

/// Largest accepted offset from UTC for the business-hours window.
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "distribution_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub pipeline_id: Uuid,

    pub tenant_id: Uuid,

    pub mode: DistributionMode,

    /// Restrict round-robin picks to the window below
    pub business_hours_only: bool,

    /// Local time-of-day the window opens
    pub start_time: NaiveTime,

    /// Local time-of-day the window closes (exclusive)
    pub end_time: NaiveTime,

    /// Allowed days as a bitmask, bit 0 = Sunday ... bit 6 = Saturday
    pub weekdays_mask: i16,

    /// Fixed offset of the pipeline's local time from UTC
    pub utc_offset_minutes: i32,

    pub skip_inactive_members: bool,

    pub fallback_to_manual: bool,

    pub sla_enabled: bool,

    pub sla_minutes: i32,

    pub sla_max_redistributions: i32,

    pub sla_limit_action: SlaLimitAction,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// How new leads in a pipeline receive a responsible member.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    #[sea_orm(string_value = "manual")]
    #[default]
    Manual,

    #[sea_orm(string_value = "round_robin")]
    RoundRobin,
}

/// Terminal action applied once the redistribution budget is spent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SlaLimitAction {
    #[sea_orm(string_value = "keep_last_assignee")]
    #[default]
    KeepLastAssignee,

    #[sea_orm(string_value = "return_to_admin_queue")]
    ReturnToAdminQueue,

    #[sea_orm(string_value = "unassign")]
    Unassign,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Configuration a pipeline behaves with before an administrator saves one:
    /// manual assignment, no business-hours restriction, SLA off.
    pub fn defaults_for(tenant_id: Uuid, pipeline_id: Uuid) -> Self {
        let now = Utc::now().fixed_offset();
        Self {
            pipeline_id,
            tenant_id,
            mode: DistributionMode::Manual,
            business_hours_only: false,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            weekdays_mask: WEEKDAYS_MON_FRI,
            utc_offset_minutes: 0,
            skip_inactive_members: true,
            fallback_to_manual: true,
            sla_enabled: false,
            sla_minutes: 30,
            sla_max_redistributions: 1,
            sla_limit_action: SlaLimitAction::KeepLastAssignee,
            created_at: now,
            updated_at: now,
        }
    }

    /// Allowed weekdays as numbers, 0 = Sunday.
    pub fn weekdays(&self) -> BTreeSet<u8> {
        (0u8..7)
            .filter(|day| self.weekdays_mask & (1 << day) != 0)
            .collect()
    }

    /// Replace the allowed weekdays. Values outside 0..=6 are ignored.
    pub fn set_weekdays<I: IntoIterator<Item = u8>>(&mut self, days: I) {
        self.weekdays_mask = days
            .into_iter()
            .filter(|day| *day < 7)
            .fold(0i16, |mask, day| mask | (1 << day));
    }

    /// SLA window as a duration.
    pub fn sla_window(&self) -> Duration {
        Duration::minutes(i64::from(self.sla_minutes))
    }

    /// Whether `at` falls inside the business-hours window. Always true when the
    /// pipeline does not restrict assignment to business hours.
    pub fn is_within_business_hours(&self, at: DateTime<Utc>) -> bool {
        if !self.business_hours_only {
            return true;
        }

        let Some(offset) = FixedOffset::east_opt(self.utc_offset_minutes * 60) else {
            return false;
        };
        let local = at.with_timezone(&offset);
        let time = local.time();
        let day = local.weekday().num_days_from_sunday() as u8;
        let allowed = |day: u8| self.weekdays_mask & (1 << day) != 0;

        if self.start_time < self.end_time {
            allowed(day) && time >= self.start_time && time < self.end_time
        } else if time >= self.start_time {
            // Overnight window, evening part
            allowed(day)
        } else if time < self.end_time {
            // Overnight window, early-morning part belongs to the previous day
            allowed((day + 6) % 7)
        } else {
            false
        }
    }

    /// Reject configurations the assignment and SLA paths cannot act on.
    pub fn validate(&self) -> Result<(), DistributionError> {
        if self.sla_enabled {
            if self.sla_minutes <= 0 {
                return Err(DistributionError::config_invalid(format!(
                    "sla_minutes must be positive when SLA is enabled, got {}",
                    self.sla_minutes
                )));
            }
            if self.sla_max_redistributions < 1 {
                return Err(DistributionError::config_invalid(format!(
                    "sla_max_redistributions must be at least 1 when SLA is enabled, got {}",
                    self.sla_max_redistributions
                )));
            }
        }

        if self.business_hours_only {
            if self.weekdays_mask & 0b0111_1111 == 0 {
                return Err(DistributionError::config_invalid(
                    "business hours require at least one weekday",
                ));
            }
            if self.start_time == self.end_time {
                return Err(DistributionError::config_invalid(
                    "business hours start and end must differ",
                ));
            }
        }

        if !(0..=0b0111_1111).contains(&self.weekdays_mask) {
            return Err(DistributionError::config_invalid(format!(
                "weekdays mask {} has bits outside Sunday..Saturday",
                self.weekdays_mask
            )));
        }

        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(DistributionError::config_invalid(format!(
                "utc_offset_minutes must be within +/-{}, got {}",
                MAX_UTC_OFFSET_MINUTES, self.utc_offset_minutes
            )));
        }

        Ok(())
    }
}
