//! 测试工具：内存仓储 Mock 与实体 Builder
//!
//! 单元测试不依赖真实数据库和外部执行器，全部走这里的内存实现。

pub mod builders;
pub mod mocks;

pub use builders::{DestinationBuilder, ProjectConfigBuilder, PublishTaskBuilder};
pub use mocks::{
    MockDecisionLogRepository, MockProjectRepository, MockPublishAdapter, MockStepExecutor,
    MockTaskRepository,
};
