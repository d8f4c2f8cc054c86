pub mod dependencies;
pub mod health;
pub mod operations;
pub mod tasks;
