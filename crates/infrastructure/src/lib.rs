pub mod database;
pub mod executor;
pub mod metrics;
pub mod tools;

pub use database::{
    PostgresDecisionLogRepository, PostgresProjectRepository, PostgresTaskRepository,
};
pub use executor::{PipelineRunner, WorkerPoolExecutor};
pub use tools::{CommandPipelineRunner, CommandPublishAdapter, UnconfiguredPublishAdapter};
