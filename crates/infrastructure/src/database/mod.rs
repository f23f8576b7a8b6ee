mod postgres;

pub use postgres::{
    PostgresDecisionLogRepository, PostgresProjectRepository, PostgresTaskRepository,
};
