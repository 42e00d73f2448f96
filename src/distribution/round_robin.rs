//! Round-robin selection over a pipeline's rotation cursor.
//!
//! The cursor stores the rotation order and the position of the last pick.
//! Newly linked members are appended to the order; unlinked members are dropped
//! from it the next time the cursor advances. Inactive or excluded members keep
//! their place and are skipped while ineligible.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use crate::distribution::roster::{RosterSnapshot, RosterView};
use crate::error::{DistributionError, is_unique_violation};
use crate::models::distribution_config;
use crate::models::rotation_cursor::{
    self, ActiveModel, Column, Entity as RotationCursor, encode_member_ids,
};

/// Outcome of advancing the rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Selected(Uuid),
    NoEligibleMember,
}

/// The member chosen by [`pick_next`] and the cursor state to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPick {
    pub member_id: Uuid,
    pub ordered_member_ids: Vec<Uuid>,
    pub last_assigned_index: i32,
}

/// Choose the next member after `last_index` in `order`.
///
/// `exclude` is passed over unless it is the only eligible member. Returns
/// `None` when nobody in the snapshot is eligible.
pub fn pick_next(
    order: &[Uuid],
    last_index: i32,
    snapshot: &RosterSnapshot,
    exclude: Option<Uuid>,
) -> Option<RotationPick> {
    let mut working: Vec<Uuid> = order.to_vec();
    for member_id in &snapshot.linked {
        if !working.contains(member_id) {
            working.push(*member_id);
        }
    }

    if working.is_empty() {
        return None;
    }

    let len = working.len();
    let start = (i64::from(last_index) + 1).rem_euclid(len as i64) as usize;
    let mut fallback = None;
    let mut chosen = None;

    for step in 0..len {
        let candidate = working[(start + step) % len];
        if !snapshot.is_linked(candidate) || !snapshot.is_eligible(candidate) {
            continue;
        }
        if Some(candidate) == exclude {
            fallback.get_or_insert(candidate);
            continue;
        }
        chosen = Some(candidate);
        break;
    }

    let member_id = chosen.or(fallback)?;
    let compacted: Vec<Uuid> = working
        .into_iter()
        .filter(|id| snapshot.is_linked(*id))
        .collect();
    let position = compacted.iter().position(|id| *id == member_id)?;

    Some(RotationPick {
        member_id,
        ordered_member_ids: compacted,
        last_assigned_index: position as i32,
    })
}

/// Run `attempt`, and run it once more if it lost a race on the rotation
/// cursor. A second conflict is returned to the caller.
pub async fn retry_on_stale_cursor<T, F, Fut>(
    pipeline_id: Uuid,
    mut attempt: F,
) -> Result<T, DistributionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DistributionError>>,
{
    match attempt().await {
        Err(err) if err.is_stale_cursor() => {
            counter!("distribution_cursor_conflicts_total").increment(1);
            debug!(pipeline_id = %pipeline_id, "Rotation cursor moved; retrying");
            attempt().await
        }
        outcome => outcome,
    }
}

/// Persistent round-robin selector, one cursor per pipeline
#[derive(Clone)]
pub struct RoundRobinSelector {
    db: Arc<DatabaseConnection>,
    roster: RosterView,
}

impl RoundRobinSelector {
    pub fn new(db: Arc<DatabaseConnection>, roster: RosterView) -> Self {
        Self { db, roster }
    }

    /// Advance the cursor on `conn` and return the selected member.
    ///
    /// Fails with [`DistributionError::StaleCursor`] when another writer moved
    /// the cursor since it was read; the caller decides whether to retry.
    pub async fn advance_in<C: ConnectionTrait>(
        conn: &C,
        pipeline_id: Uuid,
        snapshot: &RosterSnapshot,
        exclude: Option<Uuid>,
    ) -> Result<Selection, DistributionError> {
        if snapshot.eligible.is_empty() {
            return Ok(Selection::NoEligibleMember);
        }

        let cursor = Self::load_for_update(conn, pipeline_id).await?;
        let (order, last_index) = cursor
            .as_ref()
            .map(|cursor| (cursor.member_ids(), cursor.last_assigned_index))
            .unwrap_or_else(|| (Vec::new(), -1));

        let Some(pick) = pick_next(&order, last_index, snapshot, exclude) else {
            return Ok(Selection::NoEligibleMember);
        };

        Self::store_pick(conn, pipeline_id, cursor.as_ref(), &pick).await?;

        debug!(
            pipeline_id = %pipeline_id,
            member_id = %pick.member_id,
            position = pick.last_assigned_index,
            "Rotation cursor advanced"
        );

        Ok(Selection::Selected(pick.member_id))
    }

    /// Read the cursor row, locking it until `conn`'s transaction ends.
    pub async fn load_for_update<C: ConnectionTrait>(
        conn: &C,
        pipeline_id: Uuid,
    ) -> Result<Option<rotation_cursor::Model>, DistributionError> {
        RotationCursor::find_by_id(pipeline_id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|err| DistributionError::database("load rotation cursor", err))
    }

    /// Persist `pick` over the cursor state `read` earlier.
    ///
    /// An existing row is only overwritten while it is still at `read`'s
    /// version; a missing row is inserted at version 1. Losing either race is
    /// [`DistributionError::StaleCursor`].
    pub async fn store_pick<C: ConnectionTrait>(
        conn: &C,
        pipeline_id: Uuid,
        read: Option<&rotation_cursor::Model>,
        pick: &RotationPick,
    ) -> Result<(), DistributionError> {
        let now = Utc::now().fixed_offset();
        let Some(read) = read else {
            let cursor = ActiveModel {
                pipeline_id: Set(pipeline_id),
                ordered_member_ids: Set(encode_member_ids(&pick.ordered_member_ids)),
                last_assigned_index: Set(pick.last_assigned_index),
                version: Set(1),
                updated_at: Set(now),
            };

            return match RotationCursor::insert(cursor)
                .exec_without_returning(conn)
                .await
            {
                Ok(_) => Ok(()),
                Err(err) if is_unique_violation(&err) => {
                    Err(DistributionError::StaleCursor { pipeline_id })
                }
                Err(err) => Err(DistributionError::database("create rotation cursor", err)),
            };
        };

        let result = RotationCursor::update_many()
            .col_expr(
                Column::OrderedMemberIds,
                Expr::value(encode_member_ids(&pick.ordered_member_ids)),
            )
            .col_expr(
                Column::LastAssignedIndex,
                Expr::value(pick.last_assigned_index),
            )
            .col_expr(Column::Version, Expr::value(read.version + 1))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::PipelineId.eq(pipeline_id))
            .filter(Column::Version.eq(read.version))
            .exec(conn)
            .await
            .map_err(|err| DistributionError::database("advance rotation cursor", err))?;

        if result.rows_affected == 0 {
            return Err(DistributionError::StaleCursor { pipeline_id });
        }
        Ok(())
    }

    /// Pick the next eligible member of the pipeline in its own transaction,
    /// retrying once on a concurrent cursor update.
    pub async fn next(
        &self,
        config: &distribution_config::Model,
        at: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Selection, DistributionError> {
        let snapshot = self.roster.snapshot(config, at).await?;
        let snapshot = &snapshot;
        let pipeline_id = config.pipeline_id;

        retry_on_stale_cursor(pipeline_id, move || {
            self.advance_once(pipeline_id, snapshot, exclude)
        })
        .await
    }

    async fn advance_once(
        &self,
        pipeline_id: Uuid,
        snapshot: &RosterSnapshot,
        exclude: Option<Uuid>,
    ) -> Result<Selection, DistributionError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| DistributionError::database("start rotation transaction", err))?;

        match Self::advance_in(&txn, pipeline_id, snapshot, exclude).await {
            Ok(selection) => {
                txn.commit().await.map_err(|err| {
                    DistributionError::database("commit rotation transaction", err)
                })?;
                Ok(selection)
            }
            Err(err) => {
                txn.rollback().await.map_err(|err| {
                    DistributionError::database("rollback rotation transaction", err)
                })?;
                Err(err)
            }
        }
    }

    /// Current cursor row, if the pipeline has ever rotated
    pub async fn cursor(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Option<rotation_cursor::Model>, DistributionError> {
        RotationCursor::find_by_id(pipeline_id)
            .one(self.db.as_ref())
            .await
            .map_err(|err| DistributionError::database("load rotation cursor", err))
    }
}
