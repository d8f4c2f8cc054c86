mod failed_task_repository;
mod task_repository;

pub use failed_task_repository::PostgresFailedTaskRepository;
pub use task_repository::PostgresTaskRepository;
