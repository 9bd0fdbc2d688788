use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per (user, cell), guarded by the `uq_user_cell` unique constraint.
///
/// Revisits bump `visit_count` and advance `last_visited_at`;
/// `first_visited_at` is immutable after creation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_cell_visits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub h3_index: String,
    pub res: i16,
    pub first_visited_at: ChronoDateTimeUtc,
    pub last_visited_at: ChronoDateTimeUtc,
    pub visit_count: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id"
    )]
    Device,
    #[sea_orm(
        belongs_to = "super::h3_cell::Entity",
        from = "Column::H3Index",
        to = "super::h3_cell::Column::H3Index"
    )]
    Cell,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl Related<super::h3_cell::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cell.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
