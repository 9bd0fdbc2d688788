use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Global H3 cell registry, shared across users.
///
/// A row is created lazily the first time any user visits the cell; the
/// country/state references are resolved once at that point and never
/// re-resolved (open ocean stays NULL on both). Rows are never deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "h3_cells")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub h3_index: String,
    pub res: i16,
    pub centroid_lat: f64,
    pub centroid_lng: f64,
    pub country_id: Option<i32>,
    pub state_id: Option<i32>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::country_region::Entity",
        from = "Column::CountryId",
        to = "super::country_region::Column::Id"
    )]
    Country,
    #[sea_orm(
        belongs_to = "super::state_region::Entity",
        from = "Column::StateId",
        to = "super::state_region::Column::Id"
    )]
    State,
    #[sea_orm(has_many = "super::user_cell_visit::Entity")]
    UserVisits,
}

impl Related<super::country_region::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Country.def()
    }
}

impl Related<super::state_region::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::State.def()
    }
}

impl Related<super::user_cell_visit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserVisits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
