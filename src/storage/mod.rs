//! Persistent graph storage

pub mod models;
mod sqlite;

pub use sqlite::Database;
