//! SQLite persistence for the action queue

pub mod action_repository;
pub mod manager;

pub use action_repository::SqliteActionStore;
pub use manager::{DbManager, SqliteConnection, SqlitePool};
