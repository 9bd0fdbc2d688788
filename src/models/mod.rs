pub mod user;
pub mod device;
pub mod country_region;
pub mod state_region;
pub mod h3_cell;
pub mod user_cell_visit;
pub mod ingest_batch;
pub mod user_country_stat;
pub mod user_state_stat;
pub mod user_streak;
pub mod achievement;
pub mod user_achievement;
