pub mod config;
pub mod db;
pub mod elimination;
pub mod fixtures;
pub mod ingest;
pub mod leaderboard;
pub mod model;
pub mod seed;
