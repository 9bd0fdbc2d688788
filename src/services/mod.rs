pub mod achievement_engine;
pub mod grid;
pub mod location_processor;
pub mod map_service;
pub mod region_index;
pub mod stats_aggregator;
pub mod stats_service;
pub mod visit_ledger;
