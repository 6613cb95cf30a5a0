pub mod auth;
pub mod config;
pub mod next;
pub mod queue;
pub mod stats;
pub mod sync;
pub mod tombstones;

use std::sync::Arc;

use offsync_core::storage::Database;

/// The on-disk store shared by every command.
pub fn open_store() -> Result<Arc<Database>, Box<dyn std::error::Error>> {
    Ok(Arc::new(Database::open()?))
}
