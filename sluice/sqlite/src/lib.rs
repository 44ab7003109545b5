//! # Sluice SQLite
//!
//! A single SQLite database implementing every storage boundary of a sluice
//! pipeline:
//!
//! - [`BatchLedger`](sluice_core::ledger::BatchLedger) over `etl_batches`
//! - [`StagingStore`](sluice_core::staging::StagingStore) over `etl_staging`
//! - [`Warehouse`](sluice_core::warehouse::Warehouse) for source tables and destinations
//! - [`CacheInvalidator`](sluice_core::aggregate::CacheInvalidator) over `cache_entries`
//!
//! [`SqlRefresher`] recomputes aggregates by running SQL statements.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sluice_core::warehouse::Connections;
//! use sluice_sqlite::SqliteStore;
//!
//! let store = SqliteStore::open("data/sluice.db").unwrap();
//! let connections = Connections::new(Arc::new(store.clone()));
//! ```

mod cache;
pub mod error;
mod ledger;
mod refresher;
mod staging;
mod store;
mod warehouse;

pub use error::SqliteError;
pub use refresher::{SqlRefresher, BATCH_ID_PARAM};
pub use store::SqliteStore;
