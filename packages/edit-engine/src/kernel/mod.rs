//! Kernel module - engine infrastructure and dependencies.

pub mod deps;
pub mod memory_store;
pub mod pg_store;
pub mod scheduled_tasks;
pub mod store;
pub mod test_dependencies;
pub mod traits;

pub use deps::EngineDeps;
pub use memory_store::{MemoryEditStore, StoreLock};
pub use pg_store::{run_migrations, PgEditStore};
pub use scheduled_tasks::start_scheduler;
pub use store::{BaseEditStore, EditRepository, EntityRepository, StoreTransaction};
pub use test_dependencies::{MockClock, MockNotifier, NotificationCall};
pub use traits::*;
