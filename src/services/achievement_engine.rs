use anyhow::Result;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{achievement, user_achievement};
use crate::services::stats_aggregator::TravelSnapshot;

/// Unlock predicate, stored as the `criteria_json` column and evaluated by
/// exhaustive match over a stats snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criteria {
    CellsTotal { threshold: i64 },
    Countries { threshold: i64 },
    RegionsInCountry { threshold: i64 },
    Regions { threshold: i64 },
    Hemispheres { count: i64 },
    UniqueDays { threshold: i64 },
    Continents { threshold: i64 },
    CountryCoveragePct { threshold: f64 },
    RegionCoveragePct { threshold: f64 },
}

impl Criteria {
    pub fn satisfied_by(&self, stats: &TravelSnapshot) -> bool {
        match *self {
            Criteria::CellsTotal { threshold } => stats.cells_total >= threshold,
            Criteria::Countries { threshold } => stats.countries >= threshold,
            Criteria::RegionsInCountry { threshold } => stats.max_regions_in_country >= threshold,
            Criteria::Regions { threshold } => stats.regions >= threshold,
            Criteria::Hemispheres { count } => stats.hemispheres >= count,
            Criteria::UniqueDays { threshold } => stats.unique_days >= threshold,
            Criteria::Continents { threshold } => stats.continents >= threshold,
            Criteria::CountryCoveragePct { threshold } => {
                stats.max_country_coverage_pct >= threshold
            }
            Criteria::RegionCoveragePct { threshold } => stats.max_state_coverage_pct >= threshold,
        }
    }
}

pub struct CatalogEntry {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub criteria: Criteria,
}

/// The fixed achievement catalog, seeded insert-or-ignore at startup.
pub fn catalog() -> Vec<CatalogEntry> {
    vec![
        // Volume milestones
        CatalogEntry {
            code: "first_steps",
            name: "First Steps",
            description: "Visit your first location",
            criteria: Criteria::CellsTotal { threshold: 1 },
        },
        CatalogEntry {
            code: "explorer",
            name: "Explorer",
            description: "Visit 100 unique cells",
            criteria: Criteria::CellsTotal { threshold: 100 },
        },
        CatalogEntry {
            code: "wanderer",
            name: "Wanderer",
            description: "Visit 500 unique cells",
            criteria: Criteria::CellsTotal { threshold: 500 },
        },
        // Geographic breadth
        CatalogEntry {
            code: "globetrotter",
            name: "Globetrotter",
            description: "Visit 10 countries",
            criteria: Criteria::Countries { threshold: 10 },
        },
        CatalogEntry {
            code: "country_collector",
            name: "Country Collector",
            description: "Visit 25 countries",
            criteria: Criteria::Countries { threshold: 25 },
        },
        CatalogEntry {
            code: "state_hopper",
            name: "State Hopper",
            description: "Visit 5 regions in one country",
            criteria: Criteria::RegionsInCountry { threshold: 5 },
        },
        CatalogEntry {
            code: "regional_master",
            name: "Regional Master",
            description: "Visit 50 regions total",
            criteria: Criteria::Regions { threshold: 50 },
        },
        CatalogEntry {
            code: "hemisphere_hopper",
            name: "Hemisphere Hopper",
            description: "Visit both northern and southern hemispheres",
            criteria: Criteria::Hemispheres { count: 2 },
        },
        CatalogEntry {
            code: "frequent_traveler",
            name: "Frequent Traveler",
            description: "Visit locations on 30 different days",
            criteria: Criteria::UniqueDays { threshold: 30 },
        },
        // Continent achievements
        CatalogEntry {
            code: "continental",
            name: "Continental",
            description: "Visit 3 continents",
            criteria: Criteria::Continents { threshold: 3 },
        },
        CatalogEntry {
            code: "intercontinental",
            name: "Intercontinental",
            description: "Visit 5 continents",
            criteria: Criteria::Continents { threshold: 5 },
        },
        CatalogEntry {
            code: "world_explorer",
            name: "World Explorer",
            description: "Visit all 7 continents",
            criteria: Criteria::Continents { threshold: 7 },
        },
        // Coverage depth
        CatalogEntry {
            code: "country_explorer",
            name: "Country Explorer",
            description: "Achieve 10% coverage of any country",
            criteria: Criteria::CountryCoveragePct { threshold: 0.10 },
        },
        CatalogEntry {
            code: "country_master",
            name: "Country Master",
            description: "Achieve 25% coverage of any country",
            criteria: Criteria::CountryCoveragePct { threshold: 0.25 },
        },
        CatalogEntry {
            code: "country_conqueror",
            name: "Country Conqueror",
            description: "Achieve 50% coverage of any country",
            criteria: Criteria::CountryCoveragePct { threshold: 0.50 },
        },
        CatalogEntry {
            code: "region_explorer",
            name: "Region Explorer",
            description: "Achieve 25% coverage of any state/province",
            criteria: Criteria::RegionCoveragePct { threshold: 0.25 },
        },
        CatalogEntry {
            code: "region_master",
            name: "Region Master",
            description: "Achieve 50% coverage of any state/province",
            criteria: Criteria::RegionCoveragePct { threshold: 0.50 },
        },
    ]
}

/// Insert-or-ignore the catalog by code.
pub async fn seed_achievements<C: ConnectionTrait>(conn: &C) -> Result<()> {
    for entry in catalog() {
        let row = achievement::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(entry.code.to_string()),
            name: Set(entry.name.to_string()),
            description: Set(Some(entry.description.to_string())),
            criteria_json: Set(Some(serde_json::to_value(&entry.criteria)?)),
            created_at: Set(Utc::now()),
        };

        achievement::Entity::insert(row)
            .on_conflict(
                OnConflict::column(achievement::Column::Code)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }

    Ok(())
}

/// Check the catalog against a stats snapshot and record new unlocks.
///
/// Unlocks are monotonic: the (user, achievement) unique constraint plus
/// ON CONFLICT DO NOTHING make redundant calls silently no-ops, and rows are
/// never revoked even if stats later recompute lower. Returns the codes
/// unlocked by this call only.
pub async fn evaluate_and_unlock<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    stats: &TravelSnapshot,
) -> Result<Vec<String>> {
    let mut unlocked = Vec::new();

    for row in achievement::Entity::find().all(conn).await? {
        let criteria: Criteria = match &row.criteria_json {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("Achievement '{}' has invalid criteria: {}", row.code, e);
                    continue;
                }
            },
            None => continue,
        };

        if !criteria.satisfied_by(stats) {
            continue;
        }

        let unlock = user_achievement::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            achievement_id: Set(row.id),
            unlocked_at: Set(Utc::now()),
        };

        let inserted = user_achievement::Entity::insert(unlock)
            .on_conflict(
                OnConflict::columns([
                    user_achievement::Column::UserId,
                    user_achievement::Column::AchievementId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        if inserted > 0 {
            log::info!("User {} unlocked achievement '{}'", user_id, row.code);
            unlocked.push(row.code);
        }
    }

    Ok(unlocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_codes_are_unique() {
        let entries = catalog();
        let codes: HashSet<_> = entries.iter().map(|e| e.code).collect();
        assert_eq!(codes.len(), entries.len());
        assert_eq!(entries.len(), 17);
    }

    #[test]
    fn test_criteria_json_shape() {
        let json = serde_json::to_value(&Criteria::CellsTotal { threshold: 100 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "cells_total", "threshold": 100})
        );

        let parsed: Criteria =
            serde_json::from_value(serde_json::json!({"type": "hemispheres", "count": 2}))
                .unwrap();
        assert_eq!(parsed, Criteria::Hemispheres { count: 2 });
    }

    #[test]
    fn test_threshold_evaluation() {
        let stats = TravelSnapshot {
            cells_total: 100,
            countries: 9,
            max_country_coverage_pct: 0.11,
            ..Default::default()
        };

        assert!(Criteria::CellsTotal { threshold: 100 }.satisfied_by(&stats));
        assert!(Criteria::CellsTotal { threshold: 1 }.satisfied_by(&stats));
        assert!(!Criteria::CellsTotal { threshold: 101 }.satisfied_by(&stats));
        assert!(!Criteria::Countries { threshold: 10 }.satisfied_by(&stats));
        assert!(Criteria::CountryCoveragePct { threshold: 0.10 }.satisfied_by(&stats));
        assert!(!Criteria::CountryCoveragePct { threshold: 0.25 }.satisfied_by(&stats));
    }

    #[test]
    fn test_breadth_evaluation() {
        let stats = TravelSnapshot {
            regions: 50,
            max_regions_in_country: 5,
            continents: 3,
            hemispheres: 2,
            unique_days: 30,
            ..Default::default()
        };

        assert!(Criteria::Regions { threshold: 50 }.satisfied_by(&stats));
        assert!(Criteria::RegionsInCountry { threshold: 5 }.satisfied_by(&stats));
        assert!(Criteria::Continents { threshold: 3 }.satisfied_by(&stats));
        assert!(!Criteria::Continents { threshold: 5 }.satisfied_by(&stats));
        assert!(Criteria::Hemispheres { count: 2 }.satisfied_by(&stats));
        assert!(Criteria::UniqueDays { threshold: 30 }.satisfied_by(&stats));
    }

    #[test]
    fn test_empty_snapshot_satisfies_nothing() {
        let stats = TravelSnapshot::default();
        for entry in catalog() {
            assert!(
                !entry.criteria.satisfied_by(&stats),
                "'{}' unlocked with empty stats",
                entry.code
            );
        }
    }
}
