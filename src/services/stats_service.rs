use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbBackend, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, Statement,
};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{achievement, user_achievement, user_streak};
use crate::services::stats_aggregator;

/// Whitelisted sort fields for the country/region listings. Parsing instead
/// of interpolating the caller's string keeps the raw SQL injection-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CoveragePct,
    FirstVisitedAt,
    LastVisitedAt,
    Name,
}

impl SortField {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "coverage_pct" => Some(Self::CoveragePct),
            "first_visited_at" => Some(Self::FirstVisitedAt),
            "last_visited_at" => Some(Self::LastVisitedAt),
            "name" => Some(Self::Name),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::CoveragePct => "coverage_pct",
            Self::FirstVisitedAt => "first_visited_at",
            Self::LastVisitedAt => "last_visited_at",
            Self::Name => "name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct RegionStatRow {
    code: String,
    name: String,
    country_code: Option<String>,
    country_name: Option<String>,
    cells_visited: i64,
    cells_total: i64,
    first_visited_at: Option<DateTime<Utc>>,
    last_visited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    total: i64,
}

#[derive(Debug, Serialize)]
pub struct VisitedRegion {
    pub code: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    pub coverage_pct: f64,
    pub first_visited_at: Option<DateTime<Utc>>,
    pub last_visited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CountriesResponse {
    pub total_countries_visited: i64,
    pub countries: Vec<VisitedRegion>,
}

#[derive(Debug, Serialize)]
pub struct RegionsResponse {
    pub total_regions_visited: i64,
    pub regions: Vec<VisitedRegion>,
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub total_cells_visited: i64,
    pub total_countries_visited: i64,
    pub total_regions_visited: i64,
    pub unique_visit_days: i64,
    pub current_streak_days: i32,
    pub longest_streak_days: i32,
    pub achievements_unlocked: u64,
}

#[derive(Debug, Serialize)]
pub struct AchievementView {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Read-only projections over the visit ledger and rollup tables.
pub struct StatsService {
    db: DatabaseConnection,
    user_id: Uuid,
}

impl StatsService {
    pub fn new(db: DatabaseConnection, user_id: Uuid) -> Self {
        Self { db, user_id }
    }

    pub async fn get_overview(&self) -> Result<OverviewResponse> {
        let snapshot = stats_aggregator::travel_snapshot(&self.db, self.user_id).await?;

        let streak = user_streak::Entity::find()
            .filter(user_streak::Column::UserId.eq(self.user_id))
            .one(&self.db)
            .await?;

        let achievements_unlocked = user_achievement::Entity::find()
            .filter(user_achievement::Column::UserId.eq(self.user_id))
            .count(&self.db)
            .await?;

        Ok(OverviewResponse {
            total_cells_visited: snapshot.cells_total,
            total_countries_visited: snapshot.countries,
            total_regions_visited: snapshot.regions,
            unique_visit_days: snapshot.unique_days,
            current_streak_days: streak.as_ref().map(|s| s.current_streak_days).unwrap_or(0),
            longest_streak_days: streak.as_ref().map(|s| s.longest_streak_days).unwrap_or(0),
            achievements_unlocked,
        })
    }

    pub async fn get_countries(
        &self,
        sort_by: SortField,
        order: SortOrder,
        limit: u64,
        offset: u64,
    ) -> Result<CountriesResponse> {
        let total = CountRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT COUNT(DISTINCT c.id) AS total
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            JOIN regions_country c ON hc.country_id = c.id
            WHERE ucv.user_id = $1 AND ucv.res = 8
            "#,
            [self.user_id.into()],
        ))
        .one(&self.db)
        .await?
        .map(|r| r.total)
        .unwrap_or(0);

        let sort_sql = match sort_by {
            SortField::CoveragePct => {
                "(COUNT(ucv.id)::float / GREATEST(c.land_cells_total_resolution8, 1))"
            }
            SortField::Name => "c.name",
            other => other.sql(),
        };

        let sql = format!(
            r#"
            SELECT
                c.iso2 AS code,
                c.name,
                NULL::text AS country_code,
                NULL::text AS country_name,
                COUNT(ucv.id) AS cells_visited,
                GREATEST(c.land_cells_total_resolution8, 1) AS cells_total,
                MIN(ucv.first_visited_at) AS first_visited_at,
                MAX(ucv.last_visited_at) AS last_visited_at
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            JOIN regions_country c ON hc.country_id = c.id
            WHERE ucv.user_id = $1 AND ucv.res = 8
            GROUP BY c.id, c.iso2, c.name, c.land_cells_total_resolution8
            ORDER BY {} {}
            LIMIT $2 OFFSET $3
            "#,
            sort_sql,
            order.sql()
        );

        let rows = RegionStatRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [self.user_id.into(), (limit as i64).into(), (offset as i64).into()],
        ))
        .all(&self.db)
        .await?;

        Ok(CountriesResponse {
            total_countries_visited: total,
            countries: rows.into_iter().map(visited_region).collect(),
        })
    }

    pub async fn get_regions(
        &self,
        sort_by: SortField,
        order: SortOrder,
        limit: u64,
        offset: u64,
    ) -> Result<RegionsResponse> {
        let total = CountRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT COUNT(DISTINCT s.id) AS total
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            JOIN regions_state s ON hc.state_id = s.id
            WHERE ucv.user_id = $1 AND ucv.res = 8
            "#,
            [self.user_id.into()],
        ))
        .one(&self.db)
        .await?
        .map(|r| r.total)
        .unwrap_or(0);

        let sort_sql = match sort_by {
            SortField::CoveragePct => {
                "(COUNT(ucv.id)::float / GREATEST(s.land_cells_total_resolution8, 1))"
            }
            SortField::Name => "s.name",
            other => other.sql(),
        };

        let sql = format!(
            r#"
            SELECT
                CONCAT(c.iso2, '-', s.code) AS code,
                s.name,
                c.iso2 AS country_code,
                c.name AS country_name,
                COUNT(ucv.id) AS cells_visited,
                GREATEST(s.land_cells_total_resolution8, 1) AS cells_total,
                MIN(ucv.first_visited_at) AS first_visited_at,
                MAX(ucv.last_visited_at) AS last_visited_at
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            JOIN regions_state s ON hc.state_id = s.id
            JOIN regions_country c ON s.country_id = c.id
            WHERE ucv.user_id = $1 AND ucv.res = 8
            GROUP BY s.id, s.code, s.name, s.land_cells_total_resolution8, c.id, c.iso2, c.name
            ORDER BY {} {}
            LIMIT $2 OFFSET $3
            "#,
            sort_sql,
            order.sql()
        );

        let rows = RegionStatRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [self.user_id.into(), (limit as i64).into(), (offset as i64).into()],
        ))
        .all(&self.db)
        .await?;

        Ok(RegionsResponse {
            total_regions_visited: total,
            regions: rows.into_iter().map(visited_region).collect(),
        })
    }

    /// Full catalog with this user's unlock timestamps.
    pub async fn get_achievements(&self) -> Result<Vec<AchievementView>> {
        let entries = achievement::Entity::find().all(&self.db).await?;
        let unlocks = user_achievement::Entity::find()
            .filter(user_achievement::Column::UserId.eq(self.user_id))
            .all(&self.db)
            .await?;

        let unlocked_at = |achievement_id: Uuid| {
            unlocks
                .iter()
                .find(|u| u.achievement_id == achievement_id)
                .map(|u| u.unlocked_at)
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                let unlocked_at = unlocked_at(entry.id);
                AchievementView {
                    code: entry.code,
                    name: entry.name,
                    description: entry.description,
                    unlocked: unlocked_at.is_some(),
                    unlocked_at,
                }
            })
            .collect())
    }
}

fn visited_region(row: RegionStatRow) -> VisitedRegion {
    let coverage_pct = row.cells_visited as f64 / row.cells_total.max(1) as f64;
    VisitedRegion {
        code: row.code,
        name: row.name,
        country_code: row.country_code,
        country_name: row.country_name,
        coverage_pct: round6(coverage_pct),
        first_visited_at: row.first_visited_at,
        last_visited_at: row.last_visited_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_field_whitelist() {
        assert_eq!(SortField::parse("coverage_pct"), Some(SortField::CoveragePct));
        assert_eq!(SortField::parse("name"), Some(SortField::Name));
        assert_eq!(SortField::parse("1; DROP TABLE users"), None);
        assert_eq!(SortOrder::parse("asc"), Some(SortOrder::Asc));
        assert_eq!(SortOrder::parse("sideways"), None);
    }

    #[test]
    fn test_round6() {
        assert_eq!(round6(1.0 / 3.0), 0.333333);
        assert_eq!(round6(0.0), 0.0);
    }
}
