pub mod bulk;
pub mod executor;
pub mod lifecycle;
pub mod planner;
pub mod readiness;
pub mod scoring;
pub mod watchdog;

pub use bulk::{BulkDispatcher, BulkOperation};
pub use executor::{ControlSignal, ExecutionOutcome, PublishAdapter, PublishSuccess, StepExecutor};
pub use lifecycle::TaskLifecycle;
pub use planner::{compute_plan, DestinationSnapshot, EligibleTask, PlanInput, PlannerService};
pub use readiness::{DefaultReadinessChecklist, ReadinessChecklist};
pub use watchdog::Watchdog;
