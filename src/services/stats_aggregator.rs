use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, FromQueryResult, QueryFilter, Set,
    Statement,
};
use uuid::Uuid;

use crate::models::{
    country_region, state_region, user_country_stat, user_state_stat, user_streak,
};

/// Consecutive-day streak window. `start`/`end` bound the current run;
/// `longest_days` is a running maximum that never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreakState {
    pub current_days: i32,
    pub longest_days: i32,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Fold one distinct visit day into the streak. Days must be applied in
/// ascending order; `update_streak` sorts before folding so out-of-order
/// batch arrival cannot corrupt the window.
///
/// A day inside the current window is a no-op (duplicate same-day
/// submissions are idempotent). A day adjacent to either edge extends the
/// run; a day past a gap starts a new run; a stale day older than
/// `start - 1` is ignored rather than shrinking history.
pub fn fold_day(mut state: StreakState, day: NaiveDate) -> StreakState {
    match (state.start, state.end) {
        (Some(start), Some(end)) => {
            if day >= start && day <= end {
                // already counted
            } else if end.succ_opt() == Some(day) {
                state.end = Some(day);
                state.current_days += 1;
            } else if start.pred_opt() == Some(day) {
                state.start = Some(day);
                state.current_days += 1;
            } else if day > end {
                state.start = Some(day);
                state.end = Some(day);
                state.current_days = 1;
            }
        }
        _ => {
            state.start = Some(day);
            state.end = Some(day);
            state.current_days = 1;
        }
    }

    state.longest_days = state.longest_days.max(state.current_days);
    state
}

#[derive(Debug, FromQueryResult)]
struct VisitAgg {
    cells_visited: i64,
    first_visited_at: Option<chrono::DateTime<Utc>>,
    last_visited_at: Option<chrono::DateTime<Utc>>,
}

async fn visit_agg<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    region_column: &str,
    region_id: i32,
) -> Result<VisitAgg> {
    // region_column is an internal constant, never caller input
    let sql = format!(
        r#"
        SELECT
            COUNT(ucv.id) AS cells_visited,
            MIN(ucv.first_visited_at) AS first_visited_at,
            MAX(ucv.last_visited_at) AS last_visited_at
        FROM user_cell_visits ucv
        JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
        WHERE ucv.user_id = $1 AND ucv.res = 8 AND hc.{} = $2
        "#,
        region_column
    );

    VisitAgg::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        sql,
        [user_id.into(), region_id.into()],
    ))
    .one(conn)
    .await?
    .ok_or_else(|| anyhow!("aggregation query returned no row"))
}

/// Recompute the per-user country rollup from the visit ledger and upsert
/// the denormalized row. Coverage divides by the precomputed land-cell total
/// (floored at 1 by the offline pipeline, floored again here for safety).
pub async fn update_country_stat<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    country_id: i32,
) -> Result<()> {
    let country = country_region::Entity::find_by_id(country_id)
        .one(conn)
        .await?
        .ok_or_else(|| anyhow!("country {} not found", country_id))?;

    let agg = visit_agg(conn, user_id, "country_id", country_id).await?;
    let total = country.land_cells_total_resolution8.max(1);
    let coverage_pct = agg.cells_visited as f64 / total as f64;

    let row = user_country_stat::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        country_id: Set(country_id),
        cells_visited: Set(agg.cells_visited as i32),
        coverage_pct: Set(coverage_pct),
        first_visited_at: Set(agg.first_visited_at),
        last_visited_at: Set(agg.last_visited_at),
    };

    user_country_stat::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([
                user_country_stat::Column::UserId,
                user_country_stat::Column::CountryId,
            ])
            .update_columns([
                user_country_stat::Column::CellsVisited,
                user_country_stat::Column::CoveragePct,
                user_country_stat::Column::FirstVisitedAt,
                user_country_stat::Column::LastVisitedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    Ok(())
}

/// State/province counterpart of `update_country_stat`.
pub async fn update_state_stat<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    state_id: i32,
) -> Result<()> {
    let state = state_region::Entity::find_by_id(state_id)
        .one(conn)
        .await?
        .ok_or_else(|| anyhow!("state {} not found", state_id))?;

    let agg = visit_agg(conn, user_id, "state_id", state_id).await?;
    let total = state.land_cells_total_resolution8.max(1);
    let coverage_pct = agg.cells_visited as f64 / total as f64;

    let row = user_state_stat::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        state_id: Set(state_id),
        cells_visited: Set(agg.cells_visited as i32),
        coverage_pct: Set(coverage_pct),
        first_visited_at: Set(agg.first_visited_at),
        last_visited_at: Set(agg.last_visited_at),
    };

    user_state_stat::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([
                user_state_stat::Column::UserId,
                user_state_stat::Column::StateId,
            ])
            .update_columns([
                user_state_stat::Column::CellsVisited,
                user_state_stat::Column::CoveragePct,
                user_state_stat::Column::FirstVisitedAt,
                user_state_stat::Column::LastVisitedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    Ok(())
}

/// Fold the distinct visit days of this ingestion into the stored streak.
pub async fn update_streak<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    days: &BTreeSet<NaiveDate>,
) -> Result<StreakState> {
    let existing = user_streak::Entity::find()
        .filter(user_streak::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    let mut state = existing
        .as_ref()
        .map(|row| StreakState {
            current_days: row.current_streak_days,
            longest_days: row.longest_streak_days,
            start: row.current_streak_start,
            end: row.current_streak_end,
        })
        .unwrap_or_default();

    // BTreeSet iterates ascending, which the fold depends on
    for day in days {
        state = fold_day(state, *day);
    }

    let row = user_streak::ActiveModel {
        id: Set(existing.map(|r| r.id).unwrap_or_else(Uuid::new_v4)),
        user_id: Set(user_id),
        current_streak_days: Set(state.current_days),
        longest_streak_days: Set(state.longest_days),
        current_streak_start: Set(state.start),
        current_streak_end: Set(state.end),
        updated_at: Set(Utc::now()),
    };

    user_streak::Entity::insert(row)
        .on_conflict(
            OnConflict::column(user_streak::Column::UserId)
                .update_columns([
                    user_streak::Column::CurrentStreakDays,
                    user_streak::Column::LongestStreakDays,
                    user_streak::Column::CurrentStreakStart,
                    user_streak::Column::CurrentStreakEnd,
                    user_streak::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    Ok(state)
}

/// Aggregate stats snapshot consumed by achievement evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TravelSnapshot {
    pub cells_total: i64,
    pub countries: i64,
    pub regions: i64,
    pub max_regions_in_country: i64,
    pub continents: i64,
    pub hemispheres: i64,
    pub unique_days: i64,
    pub max_country_coverage_pct: f64,
    pub max_state_coverage_pct: f64,
}

#[derive(Debug, FromQueryResult)]
struct BreadthAgg {
    cells_total: i64,
    countries: i64,
    regions: i64,
    continents: i64,
    hemispheres: i64,
}

#[derive(Debug, FromQueryResult)]
struct MaxAgg {
    value: i64,
}

#[derive(Debug, FromQueryResult)]
struct MaxCoverage {
    value: f64,
}

pub async fn travel_snapshot<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<TravelSnapshot> {
    let breadth = BreadthAgg::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        SELECT
            COUNT(DISTINCT ucv.h3_index) AS cells_total,
            COUNT(DISTINCT hc.country_id) AS countries,
            COUNT(DISTINCT hc.state_id) AS regions,
            COUNT(DISTINCT rc.continent) AS continents,
            COUNT(DISTINCT CASE WHEN hc.centroid_lat >= 0 THEN 'N' ELSE 'S' END) AS hemispheres
        FROM user_cell_visits ucv
        JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
        LEFT JOIN regions_country rc ON hc.country_id = rc.id
        WHERE ucv.user_id = $1 AND ucv.res = 8
        "#,
        [user_id.into()],
    ))
    .one(conn)
    .await?
    .ok_or_else(|| anyhow!("snapshot query returned no row"))?;

    // Distinct calendar days with any visit activity. First sightings and
    // revisits both mint days; last_visited_at only ever advances, so
    // replaying an old batch cannot backfill days.
    let unique_days = MaxAgg::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        SELECT COUNT(*) AS value
        FROM (
            SELECT CAST(first_visited_at AS date) AS day
            FROM user_cell_visits
            WHERE user_id = $1 AND res = 8
            UNION
            SELECT CAST(last_visited_at AS date)
            FROM user_cell_visits
            WHERE user_id = $1 AND res = 8
        ) t
        "#,
        [user_id.into()],
    ))
    .one(conn)
    .await?
    .map(|r| r.value)
    .unwrap_or(0);

    let max_regions = MaxAgg::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        SELECT COALESCE(MAX(t.cnt), 0) AS value
        FROM (
            SELECT COUNT(DISTINCT hc.state_id) AS cnt
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            WHERE ucv.user_id = $1 AND ucv.res = 8 AND hc.state_id IS NOT NULL
            GROUP BY hc.country_id
        ) t
        "#,
        [user_id.into()],
    ))
    .one(conn)
    .await?
    .map(|r| r.value)
    .unwrap_or(0);

    let max_country_coverage = MaxCoverage::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT COALESCE(MAX(coverage_pct), 0) AS value FROM user_country_stats WHERE user_id = $1",
        [user_id.into()],
    ))
    .one(conn)
    .await?
    .map(|r| r.value)
    .unwrap_or(0.0);

    let max_state_coverage = MaxCoverage::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT COALESCE(MAX(coverage_pct), 0) AS value FROM user_state_stats WHERE user_id = $1",
        [user_id.into()],
    ))
    .one(conn)
    .await?
    .map(|r| r.value)
    .unwrap_or(0.0);

    Ok(TravelSnapshot {
        cells_total: breadth.cells_total,
        countries: breadth.countries,
        regions: breadth.regions,
        max_regions_in_country: max_regions,
        continents: breadth.continents,
        hemispheres: breadth.hemispheres,
        unique_days,
        max_country_coverage_pct: max_country_coverage,
        max_state_coverage_pct: max_state_coverage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn fold_all(days: &[&str]) -> StreakState {
        days.iter()
            .fold(StreakState::default(), |state, s| fold_day(state, d(s)))
    }

    #[test]
    fn test_first_day_starts_streak() {
        let state = fold_all(&["2025-03-01"]);
        assert_eq!(state.current_days, 1);
        assert_eq!(state.longest_days, 1);
        assert_eq!(state.start, Some(d("2025-03-01")));
        assert_eq!(state.end, Some(d("2025-03-01")));
    }

    #[test]
    fn test_consecutive_days_extend() {
        let state = fold_all(&["2025-03-01", "2025-03-02", "2025-03-03"]);
        assert_eq!(state.current_days, 3);
        assert_eq!(state.longest_days, 3);
    }

    #[test]
    fn test_gap_resets_current_but_keeps_longest() {
        // D, D+1, D+3: the gap before D+3 breaks the two-day run
        let state = fold_all(&["2025-03-01", "2025-03-02", "2025-03-04"]);
        assert_eq!(state.current_days, 1);
        assert_eq!(state.longest_days, 2);
        assert_eq!(state.start, Some(d("2025-03-04")));
    }

    #[test]
    fn test_same_day_is_idempotent() {
        let once = fold_all(&["2025-03-01", "2025-03-02"]);
        let twice = fold_all(&["2025-03-01", "2025-03-02", "2025-03-02"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_late_arriving_adjacent_day_extends_backwards() {
        let state = fold_all(&["2025-03-02", "2025-03-03"]);
        let state = fold_day(state, d("2025-03-01"));
        assert_eq!(state.current_days, 3);
        assert_eq!(state.start, Some(d("2025-03-01")));
        assert_eq!(state.end, Some(d("2025-03-03")));
    }

    #[test]
    fn test_stale_history_does_not_shrink_streak() {
        let state = fold_all(&["2025-03-10", "2025-03-11"]);
        let state = fold_day(state, d("2025-03-01"));
        assert_eq!(state.current_days, 2);
        assert_eq!(state.start, Some(d("2025-03-10")));
    }

    #[test]
    fn test_longest_never_decreases() {
        let state = fold_all(&[
            "2025-03-01",
            "2025-03-02",
            "2025-03-03",
            "2025-03-10",
            "2025-03-11",
        ]);
        assert_eq!(state.current_days, 2);
        assert_eq!(state.longest_days, 3);
    }
}
