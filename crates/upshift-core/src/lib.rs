pub mod lock;
pub mod runner;
pub mod source;
pub mod store;
pub mod unit;

pub use lock::MigrationLock;
pub use runner::{ApplyReport, RevertReport, Runner, UnitStatus};
pub use source::DirectorySource;
pub use store::{AppliedMigration, SchemaStore};
pub use unit::{MigrationSet, MigrationUnit};
