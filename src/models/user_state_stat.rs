use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Denormalized per-user state/province coverage rollup, one row per
/// (user, state).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_state_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub state_id: i32,
    pub cells_visited: i32,
    pub coverage_pct: f64,
    pub first_visited_at: Option<ChronoDateTimeUtc>,
    pub last_visited_at: Option<ChronoDateTimeUtc>,
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
        belongs_to = "super::state_region::Entity",
        from = "Column::StateId",
        to = "super::state_region::Column::Id"
    )]
    State,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::state_region::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::State.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
