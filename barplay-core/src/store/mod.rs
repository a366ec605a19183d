//! Tabular store adapter.
//!
//! `BarStore` is the narrow contract the rest of the crate needs from a
//! columnar engine: replace the table, bulk insert, and a handful of read-only
//! queries. `StoreHandle` is the explicitly created, shared handle through
//! which the session layer loads tables and the query facade reads them.

pub mod columnar;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Bar, Timeframe};

pub use columnar::PolarsStore;

/// Reference bulk-insert batch size.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no bar table: load a session first")]
    NoTable,

    #[error("store engine error: {0}")]
    Engine(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Contract required of the columnar engine.
///
/// All queries are read-only and see only the table created by the most
/// recent `create_table` plus the batches inserted since.
pub trait BarStore: Send + Sync {
    /// Human-readable engine name.
    fn name(&self) -> &str;

    /// Create the bar table, dropping any existing one.
    fn create_table(&mut self) -> Result<(), StoreError>;

    /// Append one batch in the given order.
    fn insert_batch(&mut self, bars: &[Bar]) -> Result<(), StoreError>;

    /// Bars with `time <= cursor`, ascending.
    fn bars_until(&self, cursor: i64) -> Result<Vec<Bar>, StoreError>;

    /// Bars with `time <= cursor` grouped into `floor(time / w) * w` buckets.
    fn aggregate_until(&self, cursor: i64, width: Timeframe) -> Result<Vec<Bar>, StoreError>;

    /// Every distinct bar time, ascending.
    fn distinct_times(&self) -> Result<Vec<i64>, StoreError>;

    /// Number of stored rows, duplicates included.
    fn row_count(&self) -> Result<usize, StoreError>;

    /// Release the table.
    fn drop_table(&mut self);

    /// Insert `bars` in order, `batch_size` rows at a time.
    fn bulk_insert(&mut self, bars: &[Bar], batch_size: usize) -> Result<usize, StoreError> {
        for chunk in bars.chunks(batch_size.max(1)) {
            self.insert_batch(chunk)?;
        }
        Ok(bars.len())
    }
}

/// Shared handle to the single bar store.
///
/// Loading takes the write lock for the whole replace-and-insert sequence, so
/// a query can never observe a half-loaded table or interleave with a load.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<RwLock<Box<dyn BarStore>>>,
}

impl StoreHandle {
    pub fn new(store: impl BarStore + 'static) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Box::new(store))),
        }
    }

    /// Handle over a fresh Polars-backed store.
    pub fn polars() -> Self {
        Self::new(PolarsStore::new())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Box<dyn BarStore>>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Box<dyn BarStore>>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    /// Replace the table with `bars` and return the distinct-time timeline.
    pub fn load(&self, bars: &[Bar], batch_size: usize) -> Result<Vec<i64>, StoreError> {
        let mut store = self.write()?;
        store.create_table()?;
        let inserted = store.bulk_insert(bars, batch_size)?;
        let times = store.distinct_times()?;
        info!(
            engine = store.name(),
            rows = inserted,
            distinct = times.len(),
            "loaded bar table"
        );
        Ok(times)
    }

    pub fn bars_until(&self, cursor: i64) -> Result<Vec<Bar>, StoreError> {
        self.read()?.bars_until(cursor)
    }

    pub fn aggregate_until(&self, cursor: i64, width: Timeframe) -> Result<Vec<Bar>, StoreError> {
        self.read()?.aggregate_until(cursor, width)
    }

    pub fn distinct_times(&self) -> Result<Vec<i64>, StoreError> {
        self.read()?.distinct_times()
    }

    pub fn row_count(&self) -> Result<usize, StoreError> {
        self.read()?.row_count()
    }

    /// Drop the table. Later queries fail with `NoTable` until the next load.
    pub fn shutdown(&self) {
        if let Ok(mut store) = self.inner.write() {
            store.drop_table();
            debug!(engine = store.name(), "bar table dropped");
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}
