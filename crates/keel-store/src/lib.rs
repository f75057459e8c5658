//! `keel-store`: conflict-aware entity store backed by SQLite.
//!
//! Every write is its own transaction. Inserts that hit a uniqueness
//! constraint surface as [`StoreError::AlreadyExists`] rather than a generic
//! database error, which is what the backup runner relies on for
//! idempotency: the `(database_id, name)` key of the `backup` table is the
//! only coordination point between concurrent scheduling attempts.
//!
//! | Table            | Unique key                  |
//! |------------------|-----------------------------|
//! | `backup_setting` | `database_id`               |
//! | `backup`         | `(database_id, name)`       |
//! | `pipeline`       | `id`                        |
//! | `stage`          | `id`                        |
//! | `task`           | `id`                        |

pub mod backup;
pub mod db;
pub mod error;
mod filter;
pub mod pipeline;
pub mod sqlite;
pub mod store;
pub mod topology;
pub mod types;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use store::EntityStore;
pub use types::*;
