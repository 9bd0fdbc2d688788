use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::user_cell_visit::{self, Entity as UserCellVisit};

pub struct VisitOutcome {
    /// True when this call created the (user, cell) row, i.e. a discovery.
    pub is_new_cell: bool,
    pub visit: user_cell_visit::Model,
}

/// Idempotent per-(user, cell) upsert, the system-of-record write.
///
/// Safe under concurrent calls from multiple devices of the same user: the
/// insert is guarded by the `uq_user_cell` unique constraint with
/// ON CONFLICT DO NOTHING, and losing the race simply downgrades the call to
/// the revisit path. Revisits bump `visit_count` and advance
/// `last_visited_at` only forwards, so out-of-order batch timestamps never
/// regress it; `first_visited_at` is written once and never touched again.
pub async fn record_visit<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    h3_index: &str,
    res: i16,
    observed_at: DateTime<Utc>,
    device_id: Option<Uuid>,
) -> Result<VisitOutcome> {
    let candidate = user_cell_visit::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        device_id: Set(device_id),
        h3_index: Set(h3_index.to_string()),
        res: Set(res),
        first_visited_at: Set(observed_at),
        last_visited_at: Set(observed_at),
        visit_count: Set(1),
    };

    let inserted = UserCellVisit::insert(candidate)
        .on_conflict(
            OnConflict::columns([
                user_cell_visit::Column::UserId,
                user_cell_visit::Column::H3Index,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    if inserted == 0 {
        UserCellVisit::update_many()
            .col_expr(
                user_cell_visit::Column::VisitCount,
                Expr::col(user_cell_visit::Column::VisitCount).add(1),
            )
            .filter(user_cell_visit::Column::UserId.eq(user_id))
            .filter(user_cell_visit::Column::H3Index.eq(h3_index))
            .exec(conn)
            .await?;

        // monotonic: only advance, never rewind
        UserCellVisit::update_many()
            .col_expr(
                user_cell_visit::Column::LastVisitedAt,
                Expr::value(observed_at),
            )
            .filter(user_cell_visit::Column::UserId.eq(user_id))
            .filter(user_cell_visit::Column::H3Index.eq(h3_index))
            .filter(user_cell_visit::Column::LastVisitedAt.lt(observed_at))
            .exec(conn)
            .await?;
    }

    let visit = UserCellVisit::find()
        .filter(user_cell_visit::Column::UserId.eq(user_id))
        .filter(user_cell_visit::Column::H3Index.eq(h3_index))
        .one(conn)
        .await?
        .ok_or_else(|| anyhow!("visit row missing after upsert for cell {}", h3_index))?;

    Ok(VisitOutcome {
        is_new_cell: inserted > 0,
        visit,
    })
}
