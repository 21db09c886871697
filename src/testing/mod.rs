//! In-memory collaborators with failure injection, for tests and local development.

use std::sync::atomic::{AtomicUsize, Ordering};

pub mod directory;
pub mod login;
pub mod sql;

pub use directory::{MemoryDirContext, MemoryDirectory, MemoryDirectoryFactory};
pub use login::StaticLoginModule;
pub use sql::{MemoryDataSource, MemorySqlDriver, MemorySqlStore};

/// Consume one unit of an injected-failure budget.
fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}
