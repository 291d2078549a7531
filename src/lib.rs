pub mod api;
pub mod config;
pub mod db;
pub mod elo;
pub mod maintenance;
pub mod metrics;
pub mod scan;
pub mod stack;
pub mod tournament;
