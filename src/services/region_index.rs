use anyhow::{anyhow, Context, Result};
use geo::{BoundingRect, Contains, MultiPolygon, Point};
use h3o::{CellIndex, LatLng};
use rstar::{RTree, RTreeObject, AABB};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

use crate::models::{country_region, state_region};

/// Result of reverse-geocoding a cell centroid. Both `None` means open ocean
/// or territory not covered by the boundary dataset, which is valid data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionMatch {
    pub country_id: Option<i32>,
    pub state_id: Option<i32>,
}

struct RegionShape {
    id: i32,
    /// Owning country, set for state shapes only.
    country_id: Option<i32>,
    polygon: MultiPolygon<f64>,
    bbox: AABB<[f64; 2]>,
}

impl RTreeObject for RegionShape {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox
    }
}

/// In-memory spatial index over the country/state boundary polygons.
///
/// Built once at startup from the seeded `regions_*` tables and shared
/// read-only across requests. Resolution runs only for cells not yet in the
/// `h3_cells` registry, so the exact containment test stays off the steady
/// hot path.
pub struct RegionIndex {
    countries: RTree<RegionShape>,
    states: RTree<RegionShape>,
}

impl RegionIndex {
    pub async fn load(db: &DatabaseConnection) -> Result<Self> {
        let mut countries = Vec::new();
        for row in country_region::Entity::find()
            .filter(country_region::Column::Geom.is_not_null())
            .all(db)
            .await?
        {
            let geom = match row.geom {
                Some(ref value) => value,
                None => continue,
            };
            match multipolygon_from_geojson(geom) {
                Ok(polygon) => countries.push((row.id, polygon)),
                Err(e) => log::warn!("Skipping country {} ({}): {}", row.name, row.iso2, e),
            }
        }

        let mut states = Vec::new();
        for row in state_region::Entity::find()
            .filter(state_region::Column::Geom.is_not_null())
            .all(db)
            .await?
        {
            let geom = match row.geom {
                Some(ref value) => value,
                None => continue,
            };
            match multipolygon_from_geojson(geom) {
                Ok(polygon) => states.push((row.id, row.country_id, polygon)),
                Err(e) => log::warn!("Skipping state {}: {}", row.name, e),
            }
        }

        log::info!(
            "Region index loaded: {} countries, {} states",
            countries.len(),
            states.len()
        );

        Ok(Self::from_parts(countries, states))
    }

    /// Build an index from already-parsed polygons. Used by `load` and by
    /// tests with synthetic boundaries.
    pub fn from_parts(
        countries: Vec<(i32, MultiPolygon<f64>)>,
        states: Vec<(i32, i32, MultiPolygon<f64>)>,
    ) -> Self {
        let country_shapes = countries
            .into_iter()
            .filter_map(|(id, polygon)| shape(id, None, polygon))
            .collect();
        let state_shapes = states
            .into_iter()
            .filter_map(|(id, country_id, polygon)| shape(id, Some(country_id), polygon))
            .collect();

        Self {
            countries: RTree::bulk_load(country_shapes),
            states: RTree::bulk_load(state_shapes),
        }
    }

    pub fn country_count(&self) -> usize {
        self.countries.size()
    }

    pub fn state_count(&self) -> usize {
        self.states.size()
    }

    /// Reverse-geocode a cell by its centroid.
    pub fn resolve(&self, cell: CellIndex) -> RegionMatch {
        let centroid = LatLng::from(cell);
        self.resolve_point(centroid.lat(), centroid.lng())
    }

    /// Point-in-polygon with a bbox prefilter. When a point sits on a shared
    /// boundary and several polygons claim it, the lowest region id wins so
    /// repeated resolution of the same input is always identical.
    pub fn resolve_point(&self, lat: f64, lng: f64) -> RegionMatch {
        let point = Point::new(lng, lat);
        let query = AABB::from_point([lng, lat]);

        let country_id = self
            .countries
            .locate_in_envelope_intersecting(&query)
            .filter(|s| s.polygon.contains(&point))
            .map(|s| s.id)
            .min();

        let state_id = country_id.and_then(|cid| {
            self.states
                .locate_in_envelope_intersecting(&query)
                .filter(|s| s.country_id == Some(cid) && s.polygon.contains(&point))
                .map(|s| s.id)
                .min()
        });

        RegionMatch {
            country_id,
            state_id,
        }
    }
}

fn shape(id: i32, country_id: Option<i32>, polygon: MultiPolygon<f64>) -> Option<RegionShape> {
    let rect = polygon.bounding_rect()?;
    Some(RegionShape {
        id,
        country_id,
        polygon,
        bbox: AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        ),
    })
}

/// Parse a GeoJSON geometry column into a `MultiPolygon` (plain polygons are
/// wrapped as single-member multis).
pub fn multipolygon_from_geojson(value: &serde_json::Value) -> Result<MultiPolygon<f64>> {
    let geojson = geojson::GeoJson::from_json_value(value.clone())
        .context("geometry column is not valid GeoJSON")?;

    let geometry = match geojson {
        geojson::GeoJson::Geometry(g) => g,
        other => return Err(anyhow!("expected a GeoJSON geometry, got {}", other)),
    };

    match geo::Geometry::<f64>::try_from(geometry)? {
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        other => Err(anyhow!(
            "unsupported geometry type for region boundary: {:?}",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    /// Two adjacent 10x10-degree square "countries" sharing the x = 10 edge,
    /// with one 5x5 "state" inside the western country.
    fn test_index() -> RegionIndex {
        let west = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ];
        let east = polygon![
            (x: 10.0, y: 0.0),
            (x: 20.0, y: 0.0),
            (x: 20.0, y: 10.0),
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 0.0),
        ];
        let west_state = polygon![
            (x: 2.0, y: 2.0),
            (x: 7.0, y: 2.0),
            (x: 7.0, y: 7.0),
            (x: 2.0, y: 7.0),
            (x: 2.0, y: 2.0),
        ];

        RegionIndex::from_parts(
            vec![
                (1, MultiPolygon(vec![west])),
                (2, MultiPolygon(vec![east])),
            ],
            vec![(10, 1, MultiPolygon(vec![west_state]))],
        )
    }

    #[test]
    fn test_resolves_country_and_state() {
        let index = test_index();
        let hit = index.resolve_point(5.0, 5.0);
        assert_eq!(hit.country_id, Some(1));
        assert_eq!(hit.state_id, Some(10));
    }

    #[test]
    fn test_resolves_country_without_state() {
        let index = test_index();
        let hit = index.resolve_point(9.0, 9.0);
        assert_eq!(hit.country_id, Some(1));
        assert_eq!(hit.state_id, None);
    }

    #[test]
    fn test_open_ocean_resolves_to_nothing() {
        let index = test_index();
        let hit = index.resolve_point(-50.0, -50.0);
        assert_eq!(hit, RegionMatch::default());
    }

    #[test]
    fn test_states_only_consulted_within_matched_country() {
        let index = test_index();
        // inside the eastern country, which has no subdivisions
        let hit = index.resolve_point(5.0, 15.0);
        assert_eq!(hit.country_id, Some(2));
        assert_eq!(hit.state_id, None);
    }

    #[test]
    fn test_boundary_tie_break_is_deterministic() {
        // two fully overlapping squares; the lower id must win every time
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ];
        let index = RegionIndex::from_parts(
            vec![
                (7, MultiPolygon(vec![square.clone()])),
                (3, MultiPolygon(vec![square])),
            ],
            vec![],
        );

        for _ in 0..10 {
            assert_eq!(index.resolve_point(5.0, 5.0).country_id, Some(3));
        }
    }

    #[test]
    fn test_multipolygon_from_geojson() {
        let value = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]],
        });
        let mp = multipolygon_from_geojson(&value).unwrap();
        assert_eq!(mp.0.len(), 1);

        let bad = serde_json::json!({"type": "Point", "coordinates": [0.0, 0.0]});
        assert!(multipolygon_from_geojson(&bad).is_err());
    }
}
