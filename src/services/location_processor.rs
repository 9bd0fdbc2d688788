use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use h3o::{CellIndex, LatLng};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, FromQueryResult, QueryFilter, Set, Statement, TransactionTrait,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{country_region, device, h3_cell, ingest_batch, state_region};
use crate::services::region_index::RegionIndex;
use crate::services::{achievement_engine, grid, stats_aggregator, visit_ledger};

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Caller error: bad coordinates, index mismatch beyond the 1-ring
    /// tolerance, oversized batch. Maps to HTTP 400, nothing was written.
    #[error("{0}")]
    Validation(String),
    /// Transient persistence failure. Maps to HTTP 503; the enclosing
    /// transaction rolled back, so no partial state was committed.
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<grid::GridError> for ProcessError {
    fn from(e: grid::GridError) -> Self {
        ProcessError::Validation(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct IncomingLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Client-computed res-8 index; `None` means compute it server-side.
    pub h3_res8: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device_uuid: Option<String>,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionRef {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Default, Serialize)]
pub struct DiscoverySummary {
    pub new_cells: i32,
    pub new_countries: Vec<RegionRef>,
    pub new_states: Vec<RegionRef>,
    pub new_achievements: Vec<String>,
}

impl DiscoverySummary {
    /// Accumulate a per-item summary into a batch summary, deduplicating
    /// regions and achievements discovered by multiple items.
    fn merge(&mut self, other: DiscoverySummary) {
        self.new_cells += other.new_cells;
        for country in other.new_countries {
            if !self.new_countries.contains(&country) {
                self.new_countries.push(country);
            }
        }
        for state in other.new_states {
            if !self.new_states.contains(&state) {
                self.new_states.push(state);
            }
        }
        for code in other.new_achievements {
            if !self.new_achievements.contains(&code) {
                self.new_achievements.push(code);
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub summary: DiscoverySummary,
    pub errors: Vec<BatchItemError>,
}

#[derive(Debug, FromQueryResult)]
struct ExistsRow {
    present: bool,
}

/// Per-request ingestion pipeline: grid validation, lazy cell registry and
/// region resolution, visit upserts at both resolutions, discovery
/// classification, rollup recomputation and achievement evaluation.
///
/// Each location is applied inside its own database transaction; a failure
/// anywhere rolls the whole location back.
pub struct LocationProcessor {
    db: DatabaseConnection,
    regions: Arc<RegionIndex>,
    user_id: Uuid,
}

impl LocationProcessor {
    pub fn new(db: DatabaseConnection, regions: Arc<RegionIndex>, user_id: Uuid) -> Self {
        Self {
            db,
            regions,
            user_id,
        }
    }

    /// Ingest a single location and return its discovery summary.
    ///
    /// Grid validation runs before any write, device registration included:
    /// a rejected index must leave no rows behind.
    pub async fn process_location(
        &self,
        location: IncomingLocation,
        device: &DeviceInfo,
    ) -> Result<DiscoverySummary, ProcessError> {
        let (cell8, cell6) = Self::resolve_cells(&location)?;
        let device_id = self.ensure_device(device).await?;
        let summary = self
            .commit_one(cell8, cell6, location.timestamp, device_id)
            .await?;
        self.record_audit(device_id, 1).await?;
        Ok(summary)
    }

    /// Ingest a bounded batch with partial-success semantics: items failing
    /// validation are collected as (index, reason) pairs and do not abort
    /// their siblings; each valid item commits atomically on its own.
    pub async fn process_batch(
        &self,
        locations: Vec<IncomingLocation>,
        device: &DeviceInfo,
        max_batch_size: usize,
    ) -> Result<BatchSummary, ProcessError> {
        if locations.is_empty() {
            return Err(ProcessError::Validation(
                "Batch must contain at least one location".to_string(),
            ));
        }
        if locations.len() > max_batch_size {
            return Err(ProcessError::Validation(format!(
                "Batch size {} exceeds the maximum of {}; split into smaller requests",
                locations.len(),
                max_batch_size
            )));
        }

        let device_id = self.ensure_device(device).await?;

        let mut summary = DiscoverySummary::default();
        let mut errors = Vec::new();
        let mut processed = 0;

        for (index, location) in locations.iter().enumerate() {
            let (cell8, cell6) = match Self::resolve_cells(location) {
                Ok(cells) => cells,
                Err(ProcessError::Validation(reason)) => {
                    log::debug!("Batch item {} rejected: {}", index, reason);
                    errors.push(BatchItemError {
                        index,
                        error: reason,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self
                .commit_one(cell8, cell6, location.timestamp, device_id)
                .await
            {
                Ok(item) => {
                    processed += 1;
                    summary.merge(item);
                }
                // Transient persistence failures abort the remainder; items
                // already committed stay committed.
                Err(e) => return Err(e),
            }
        }

        self.record_audit(device_id, locations.len() as i32).await?;

        Ok(BatchSummary {
            processed,
            failed: errors.len(),
            summary,
            errors,
        })
    }

    /// Pure validation step: parse/verify the submitted index (or compute it
    /// from coordinates) and derive the coarse ancestor. No I/O.
    fn resolve_cells(location: &IncomingLocation) -> Result<(CellIndex, CellIndex), ProcessError> {
        let cell8 = match &location.h3_res8 {
            Some(submitted) => {
                grid::validate_submitted(location.latitude, location.longitude, submitted)?
            }
            None => grid::cell_for(location.latitude, location.longitude, grid::RES_FINE)?,
        };
        let cell6 = grid::ancestor(cell8).map_err(|e| anyhow!(e))?;
        Ok((cell8, cell6))
    }

    async fn commit_one(
        &self,
        cell8: CellIndex,
        cell6: CellIndex,
        timestamp: DateTime<Utc>,
        device_id: Option<Uuid>,
    ) -> Result<DiscoverySummary, ProcessError> {
        let txn = self.db.begin().await?;
        match self.apply(&txn, cell8, cell6, timestamp, device_id).await {
            Ok(summary) => {
                txn.commit().await?;
                Ok(summary)
            }
            Err(e) => {
                let _ = txn.rollback().await;
                Err(e)
            }
        }
    }

    async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        cell8: CellIndex,
        cell6: CellIndex,
        timestamp: DateTime<Utc>,
        device_id: Option<Uuid>,
    ) -> Result<DiscoverySummary, ProcessError> {
        let fine = self.ensure_cell(conn, cell8).await?;
        let coarse = self.ensure_cell(conn, cell6).await?;

        // Region discovery is judged against the ledger as it stood before
        // this location's visit lands.
        let country_known = match fine.country_id {
            Some(id) => self.has_region_visit(conn, "country_id", id).await?,
            None => true,
        };
        let state_known = match fine.state_id {
            Some(id) => self.has_region_visit(conn, "state_id", id).await?,
            None => true,
        };

        let fine_visit = visit_ledger::record_visit(
            conn,
            self.user_id,
            &fine.h3_index,
            fine.res,
            timestamp,
            device_id,
        )
        .await?;
        let coarse_visit = visit_ledger::record_visit(
            conn,
            self.user_id,
            &coarse.h3_index,
            coarse.res,
            timestamp,
            device_id,
        )
        .await?;

        let mut summary = DiscoverySummary {
            new_cells: [&fine_visit, &coarse_visit]
                .iter()
                .filter(|v| v.is_new_cell)
                .count() as i32,
            ..Default::default()
        };

        if let Some(country_id) = fine.country_id {
            stats_aggregator::update_country_stat(conn, self.user_id, country_id).await?;

            if fine_visit.is_new_cell && !country_known {
                let country = country_region::Entity::find_by_id(country_id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| anyhow!("country {} referenced by cell is gone", country_id))?;
                summary.new_countries.push(RegionRef {
                    code: country.iso2,
                    name: country.name,
                });
            }
        }

        if let Some(state_id) = fine.state_id {
            stats_aggregator::update_state_stat(conn, self.user_id, state_id).await?;

            if fine_visit.is_new_cell && !state_known {
                let state = state_region::Entity::find_by_id(state_id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| anyhow!("state {} referenced by cell is gone", state_id))?;
                let country_iso2 = country_region::Entity::find_by_id(state.country_id)
                    .one(conn)
                    .await?
                    .map(|c| c.iso2)
                    .unwrap_or_default();
                summary.new_states.push(RegionRef {
                    code: format!("{}-{}", country_iso2, state.code),
                    name: state.name,
                });
            }
        }

        let mut days = BTreeSet::new();
        days.insert(timestamp.date_naive());
        stats_aggregator::update_streak(conn, self.user_id, &days).await?;

        let snapshot = stats_aggregator::travel_snapshot(conn, self.user_id).await?;
        summary.new_achievements =
            achievement_engine::evaluate_and_unlock(conn, self.user_id, &snapshot).await?;

        Ok(summary)
    }

    /// Insert-or-ignore into the shared cell registry, resolving the region
    /// lazily on first sight. Concurrent first visits by different users can
    /// race here; resolution is deterministic, so the losing insert is
    /// dropped and both requests read back the identical row.
    async fn ensure_cell<C: ConnectionTrait>(
        &self,
        conn: &C,
        cell: CellIndex,
    ) -> Result<h3_cell::Model, ProcessError> {
        let index = cell.to_string();

        if let Some(existing) = h3_cell::Entity::find_by_id(&index).one(conn).await? {
            return Ok(existing);
        }

        let centroid = LatLng::from(cell);
        let region = self.regions.resolve(cell);
        let res = i16::from(u8::from(cell.resolution()));

        let row = h3_cell::ActiveModel {
            h3_index: Set(index.clone()),
            res: Set(res),
            centroid_lat: Set(centroid.lat()),
            centroid_lng: Set(centroid.lng()),
            country_id: Set(region.country_id),
            state_id: Set(region.state_id),
            created_at: Set(Utc::now()),
        };

        h3_cell::Entity::insert(row)
            .on_conflict(
                OnConflict::column(h3_cell::Column::H3Index)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        h3_cell::Entity::find_by_id(&index)
            .one(conn)
            .await?
            .ok_or_else(|| anyhow!("cell {} missing after registry insert", index).into())
    }

    /// Does the user already have any res-8 visit inside this region?
    async fn has_region_visit<C: ConnectionTrait>(
        &self,
        conn: &C,
        region_column: &str,
        region_id: i32,
    ) -> Result<bool, ProcessError> {
        // region_column is an internal constant, never caller input
        let sql = format!(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM user_cell_visits ucv
                JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
                WHERE ucv.user_id = $1 AND ucv.res = 8 AND hc.{} = $2
            ) AS present
            "#,
            region_column
        );

        let row = ExistsRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [self.user_id.into(), region_id.into()],
        ))
        .one(conn)
        .await?;

        Ok(row.map(|r| r.present).unwrap_or(false))
    }

    /// Register or refresh the submitting device. Runs outside the per-item
    /// transactions: device rows surviving a rejected location is harmless.
    async fn ensure_device(&self, info: &DeviceInfo) -> Result<Option<Uuid>, ProcessError> {
        let device_uuid = match info.device_uuid.as_deref() {
            Some(u) if !u.is_empty() => u,
            _ => return Ok(None),
        };

        if let Some(existing) = device::Entity::find()
            .filter(device::Column::UserId.eq(self.user_id))
            .filter(device::Column::DeviceUuid.eq(device_uuid))
            .one(&self.db)
            .await?
        {
            let device_id = existing.id;
            let mut active: device::ActiveModel = existing.into();
            active.last_seen_at = Set(Utc::now());
            if info.device_name.is_some() {
                active.name = Set(info.device_name.clone());
            }
            if info.platform.is_some() {
                active.platform = Set(info.platform.clone());
            }
            active.update(&self.db).await?;
            return Ok(Some(device_id));
        }

        let row = device::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(self.user_id),
            device_uuid: Set(device_uuid.to_string()),
            name: Set(info.device_name.clone()),
            platform: Set(info.platform.clone()),
            created_at: Set(Utc::now()),
            last_seen_at: Set(Utc::now()),
        };

        device::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([device::Column::UserId, device::Column::DeviceUuid])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        let registered = device::Entity::find()
            .filter(device::Column::UserId.eq(self.user_id))
            .filter(device::Column::DeviceUuid.eq(device_uuid))
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow!("device row missing after insert"))?;

        Ok(Some(registered.id))
    }

    /// Write-once audit row per ingestion call.
    async fn record_audit(
        &self,
        device_id: Option<Uuid>,
        cells_count: i32,
    ) -> Result<(), ProcessError> {
        let row = ingest_batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(self.user_id),
            device_id: Set(device_id),
            received_at: Set(Utc::now()),
            cells_count: Set(cells_count),
            res_min: Set(Some(i16::from(u8::from(grid::RES_COARSE)))),
            res_max: Set(Some(i16::from(u8::from(grid::RES_FINE)))),
        };
        row.insert(&self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_deduplicates_regions_and_achievements() {
        let us = RegionRef {
            code: "US".to_string(),
            name: "United States".to_string(),
        };
        let ca = RegionRef {
            code: "US-CA".to_string(),
            name: "California".to_string(),
        };

        let mut total = DiscoverySummary::default();
        total.merge(DiscoverySummary {
            new_cells: 2,
            new_countries: vec![us.clone()],
            new_states: vec![ca.clone()],
            new_achievements: vec!["first_steps".to_string()],
        });
        total.merge(DiscoverySummary {
            new_cells: 1,
            new_countries: vec![us.clone()],
            new_states: vec![ca],
            new_achievements: vec!["first_steps".to_string(), "explorer".to_string()],
        });

        assert_eq!(total.new_cells, 3);
        assert_eq!(total.new_countries, vec![us]);
        assert_eq!(total.new_states.len(), 1);
        assert_eq!(
            total.new_achievements,
            vec!["first_steps".to_string(), "explorer".to_string()]
        );
    }

    #[test]
    fn test_grid_errors_classify_as_validation() {
        let err = ProcessError::from(grid::GridError::InvalidIndex("xyz".to_string()));
        assert!(matches!(err, ProcessError::Validation(_)));
    }

    fn sf_location(h3_res8: Option<String>) -> IncomingLocation {
        IncomingLocation {
            latitude: 37.7749,
            longitude: -122.4194,
            h3_res8,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_cells_accepts_valid_input() {
        let (cell8, cell6) = LocationProcessor::resolve_cells(&sf_location(None)).unwrap();
        assert_eq!(cell8.resolution(), grid::RES_FINE);
        assert_eq!(cell8.parent(grid::RES_COARSE), Some(cell6));
    }

    /// Bad indexes must be rejected by the pure validation step, before the
    /// pipeline touches the database (device registration included).
    #[test]
    fn test_resolve_cells_rejects_bad_index_without_io() {
        let garbage = LocationProcessor::resolve_cells(&sf_location(Some("garbage".to_string())));
        assert!(matches!(garbage, Err(ProcessError::Validation(_))));

        // a cell far from the submitted coordinates is out of tolerance
        let tokyo = h3o::LatLng::new(35.6762, 139.6503)
            .unwrap()
            .to_cell(grid::RES_FINE);
        let mismatch =
            LocationProcessor::resolve_cells(&sf_location(Some(tokyo.to_string())));
        assert!(matches!(mismatch, Err(ProcessError::Validation(_))));
    }
}
