pub mod entities;
pub mod repositories;
pub mod value_objects;

// SQLx 实现（仅在启用 sqlx-support feature 时编译）
#[cfg(feature = "sqlx-support")]
pub mod sqlx_impls;

pub use entities::*;
pub use publisher_core::{CheckResult, PublisherError, PublisherResult};
pub use repositories::*;
pub use value_objects::*;
