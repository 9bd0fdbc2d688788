use anyhow::Result;
use h3o::CellIndex;
use sea_orm::{DatabaseConnection, DbBackend, FromQueryResult, Statement};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::services::grid::{RES_COARSE, RES_FINE};

/// Viewport bounds, west/south/east/north in degrees.
#[derive(Debug, Clone, Copy)]
pub struct Bbox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

#[derive(Debug, Serialize)]
pub struct SummaryEntry {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct MapSummary {
    pub countries: Vec<SummaryEntry>,
    pub regions: Vec<SummaryEntry>,
}

#[derive(Debug, Serialize)]
pub struct ViewportCells {
    pub res6: Vec<String>,
    pub res8: Vec<String>,
}

#[derive(Debug, FromQueryResult)]
struct SummaryRow {
    code: String,
    name: String,
}

#[derive(Debug, FromQueryResult)]
struct CellRow {
    h3_index: String,
    res: i16,
}

/// Map-facing projections: what to shade on the world map and which visited
/// cells fall inside a viewport.
pub struct MapService {
    db: DatabaseConnection,
    user_id: Uuid,
}

impl MapService {
    pub fn new(db: DatabaseConnection, user_id: Uuid) -> Self {
        Self { db, user_id }
    }

    /// Distinct visited countries and regions, for whole-map shading.
    /// Region codes are qualified as `<iso2>-<code>` to stay unique globally.
    pub async fn get_summary(&self) -> Result<MapSummary> {
        let countries = SummaryRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT DISTINCT c.iso2 AS code, c.name
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            JOIN regions_country c ON hc.country_id = c.id
            WHERE ucv.user_id = $1 AND ucv.res = 8
            ORDER BY c.name
            "#,
            [self.user_id.into()],
        ))
        .all(&self.db)
        .await?;

        let regions = SummaryRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT DISTINCT CONCAT(c.iso2, '-', s.code) AS code, s.name
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            JOIN regions_state s ON hc.state_id = s.id
            JOIN regions_country c ON s.country_id = c.id
            WHERE ucv.user_id = $1 AND ucv.res = 8
            ORDER BY s.name
            "#,
            [self.user_id.into()],
        ))
        .all(&self.db)
        .await?;

        Ok(MapSummary {
            countries: countries.into_iter().map(summary_entry).collect(),
            regions: regions.into_iter().map(summary_entry).collect(),
        })
    }

    /// Visited cell indexes whose centroid falls inside the viewport, at both
    /// resolutions so the client can switch level without a second request.
    pub async fn get_cells_in_viewport(&self, bbox: Bbox) -> Result<ViewportCells> {
        let rows = self.cells_in_bbox(bbox, None).await?;

        let mut res6 = Vec::new();
        let mut res8 = Vec::new();
        for row in rows {
            if row.res == i16::from(u8::from(RES_COARSE)) {
                res6.push(row.h3_index);
            } else {
                res8.push(row.h3_index);
            }
        }

        Ok(ViewportCells { res6, res8 })
    }

    /// Visited cells in the viewport as a GeoJSON FeatureCollection of cell
    /// boundary polygons. Coarse cells below zoom 10, fine above.
    pub async fn get_polygons_in_viewport(
        &self,
        bbox: Bbox,
        zoom: f64,
    ) -> Result<serde_json::Value> {
        let res = if zoom < 10.0 { RES_COARSE } else { RES_FINE };
        let rows = self
            .cells_in_bbox(bbox, Some(i16::from(u8::from(res))))
            .await?;

        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            let cell: CellIndex = match row.h3_index.parse() {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("Skipping unparseable stored cell '{}': {}", row.h3_index, e);
                    continue;
                }
            };

            let mut ring: Vec<Vec<f64>> = cell
                .boundary()
                .iter()
                .map(|v| vec![v.lng(), v.lat()])
                .collect();
            if let Some(first) = ring.first().cloned() {
                ring.push(first);
            }

            features.push(json!({
                "type": "Feature",
                "properties": {
                    "h3_index": row.h3_index,
                    "resolution": row.res,
                },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [ring],
                },
            }));
        }

        Ok(json!({
            "type": "FeatureCollection",
            "features": features,
        }))
    }

    async fn cells_in_bbox(&self, bbox: Bbox, res: Option<i16>) -> Result<Vec<CellRow>> {
        let res_clause = match res {
            Some(_) => "AND hc.res = $6",
            None => "",
        };

        let sql = format!(
            r#"
            SELECT hc.h3_index, hc.res
            FROM user_cell_visits ucv
            JOIN h3_cells hc ON ucv.h3_index = hc.h3_index
            WHERE ucv.user_id = $1
              AND hc.centroid_lng BETWEEN $2 AND $3
              AND hc.centroid_lat BETWEEN $4 AND $5
              {}
            ORDER BY hc.h3_index
            "#,
            res_clause
        );

        let mut values: Vec<sea_orm::Value> = vec![
            self.user_id.into(),
            bbox.min_lng.into(),
            bbox.max_lng.into(),
            bbox.min_lat.into(),
            bbox.max_lat.into(),
        ];
        if let Some(res) = res {
            values.push(res.into());
        }

        let rows = CellRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .all(&self.db)
        .await?;

        Ok(rows)
    }
}

fn summary_entry(row: SummaryRow) -> SummaryEntry {
    SummaryEntry {
        code: row.code,
        name: row.name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h3o::{LatLng, Resolution};

    #[test]
    fn test_polygon_ring_is_closed() {
        let cell = LatLng::new(37.7749, -122.4194)
            .unwrap()
            .to_cell(Resolution::Eight);

        let mut ring: Vec<Vec<f64>> = cell
            .boundary()
            .iter()
            .map(|v| vec![v.lng(), v.lat()])
            .collect();
        let first = ring.first().cloned().unwrap();
        ring.push(first);

        assert!(ring.len() >= 7);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_zoom_resolution_cutover() {
        let pick = |zoom: f64| if zoom < 10.0 { RES_COARSE } else { RES_FINE };
        assert_eq!(pick(3.0), Resolution::Six);
        assert_eq!(pick(9.99), Resolution::Six);
        assert_eq!(pick(10.0), Resolution::Eight);
        assert_eq!(pick(15.0), Resolution::Eight);
    }
}
