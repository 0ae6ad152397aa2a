pub mod config;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod platform;
pub mod sqlite;
pub mod storage;
