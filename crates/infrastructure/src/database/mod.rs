pub mod manager;
pub mod postgres;

pub use manager::DatabaseManager;
pub use postgres::{PostgresFailedTaskRepository, PostgresTaskRepository};
