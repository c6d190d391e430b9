pub mod models;
pub mod queries;
pub mod reports;
mod sqlite;

pub use sqlite::Database;
