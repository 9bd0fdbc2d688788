use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Country boundary reference data, seeded offline from Natural Earth.
///
/// `geom` holds a GeoJSON Polygon/MultiPolygon; the per-resolution land-cell
/// totals are precomputed by the offline polyfill pipeline and floored at 1
/// so coverage division is always safe.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "regions_country")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub iso2: String,
    pub iso3: String,
    pub name: String,
    pub continent: Option<String>,
    pub geom: Option<Json>,
    pub land_cells_total_resolution6: i64,
    pub land_cells_total_resolution8: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::state_region::Entity")]
    States,
    #[sea_orm(has_many = "super::h3_cell::Entity")]
    Cells,
}

impl Related<super::state_region::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::States.def()
    }
}

impl Related<super::h3_cell::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cells.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
