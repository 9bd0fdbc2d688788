use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// State/province boundary reference data. Not every country has
/// subdivisions; `code` is the ISO 3166-2 suffix (e.g. "CA" for US-CA).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "regions_state")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub country_id: i32,
    pub code: String,
    pub name: String,
    pub geom: Option<Json>,
    pub land_cells_total_resolution6: i64,
    pub land_cells_total_resolution8: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::country_region::Entity",
        from = "Column::CountryId",
        to = "super::country_region::Column::Id"
    )]
    Country,
    #[sea_orm(has_many = "super::h3_cell::Entity")]
    Cells,
}

impl Related<super::country_region::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Country.def()
    }
}

impl Related<super::h3_cell::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cells.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
