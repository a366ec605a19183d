//! Polars-backed bar table.
//!
//! The table is a single `DataFrame` with schema
//! `(time Int64, open Float64, high Float64, low Float64, close Float64, volume Float64)`.
//! Batches are appended with `vstack`; queries run through the lazy API.
//!
//! Duplicate times are stored as inserted. Range and aggregate queries see
//! one row per time: the last one inserted.

use polars::prelude::*;

use super::{BarStore, StoreError};
use crate::domain::{Bar, Timeframe};

impl From<PolarsError> for StoreError {
    fn from(e: PolarsError) -> Self {
        StoreError::Engine(e.to_string())
    }
}

/// In-memory columnar bar table.
#[derive(Default)]
pub struct PolarsStore {
    table: Option<DataFrame>,
}

impl PolarsStore {
    pub fn new() -> Self {
        Self { table: None }
    }

    fn table(&self) -> Result<&DataFrame, StoreError> {
        self.table.as_ref().ok_or(StoreError::NoTable)
    }

    /// Rows with `time <= cursor`, one per time (last inserted), ascending.
    fn visible(&self, cursor: i64) -> Result<LazyFrame, StoreError> {
        Ok(self
            .table()?
            .clone()
            .lazy()
            .filter(col("time").lt_eq(lit(cursor)))
            .unique_stable(Some(vec!["time".into()]), UniqueKeepStrategy::Last)
            .sort(
                ["time"],
                SortMultipleOptions::default().with_maintain_order(true),
            ))
    }
}

impl BarStore for PolarsStore {
    fn name(&self) -> &str {
        "polars"
    }

    fn create_table(&mut self) -> Result<(), StoreError> {
        self.table = Some(bars_to_dataframe(&[])?);
        Ok(())
    }

    fn insert_batch(&mut self, bars: &[Bar]) -> Result<(), StoreError> {
        let batch = bars_to_dataframe(bars)?;
        let table = self.table.as_mut().ok_or(StoreError::NoTable)?;
        table.vstack_mut(&batch)?;
        Ok(())
    }

    fn bars_until(&self, cursor: i64) -> Result<Vec<Bar>, StoreError> {
        let df = self.visible(cursor)?.collect()?;
        dataframe_to_bars(&df, "time")
    }

    fn aggregate_until(&self, cursor: i64, width: Timeframe) -> Result<Vec<Bar>, StoreError> {
        let mut df = self.visible(cursor)?.collect()?;
        let w = width.secs();
        let buckets: Vec<i64> = df
            .column("time")?
            .i64()?
            .into_no_null_iter()
            .map(|t| t.div_euclid(w) * w)
            .collect();
        df.with_column(Series::new("bucket".into(), buckets))?;

        // Rows are time-ascending, so first/last within a bucket are open/close.
        let agg = df
            .lazy()
            .group_by_stable([col("bucket")])
            .agg([
                col("open").first(),
                col("high").max(),
                col("low").min(),
                col("close").last(),
                col("volume").sum(),
            ])
            .sort(["bucket"], SortMultipleOptions::default())
            .collect()?;
        dataframe_to_bars(&agg, "bucket")
    }

    fn distinct_times(&self) -> Result<Vec<i64>, StoreError> {
        let df = self
            .table()?
            .clone()
            .lazy()
            .select([col("time").unique().sort(SortOptions::default())])
            .collect()?;
        Ok(df.column("time")?.i64()?.into_no_null_iter().collect())
    }

    fn row_count(&self) -> Result<usize, StoreError> {
        Ok(self.table()?.height())
    }

    fn drop_table(&mut self) {
        self.table = None;
    }
}

// ── DataFrame conversion ────────────────────────────────────────────

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, StoreError> {
    let times: Vec<i64> = bars.iter().map(|b| b.time).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume.max(0.0)).collect();

    Ok(DataFrame::new(vec![
        Column::new("time".into(), times),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])?)
}

fn dataframe_to_bars(df: &DataFrame, time_col: &str) -> Result<Vec<Bar>, StoreError> {
    let times = df.column(time_col)?.i64()?;
    let opens = df.column("open")?.f64()?;
    let highs = df.column("high")?.f64()?;
    let lows = df.column("low")?.f64()?;
    let closes = df.column("close")?.f64()?;
    let volumes = df.column("volume")?.f64()?;

    let bars = times
        .into_iter()
        .zip(opens)
        .zip(highs)
        .zip(lows)
        .zip(closes)
        .zip(volumes)
        .filter_map(|(((((t, o), h), l), c), v)| {
            Some(Bar::new(t?, o?, h?, l?, c?, v.unwrap_or(0.0)))
        })
        .collect();
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(bars: &[Bar]) -> PolarsStore {
        let mut store = PolarsStore::new();
        store.create_table().unwrap();
        store.bulk_insert(bars, 2).unwrap();
        store
    }

    fn minute_bars() -> Vec<Bar> {
        vec![
            Bar::new(0, 10.0, 12.0, 9.0, 11.0, 1.0),
            Bar::new(60, 11.0, 15.0, 10.0, 14.0, 2.0),
            Bar::new(120, 14.0, 14.5, 8.0, 9.0, 3.0),
            Bar::new(180, 9.0, 10.0, 7.0, 8.0, 4.0),
            Bar::new(240, 8.0, 13.0, 8.0, 12.0, 5.0),
            Bar::new(300, 12.0, 12.0, 11.0, 11.5, 6.0),
        ]
    }

    #[test]
    fn queries_without_table_fail() {
        let store = PolarsStore::new();
        assert!(matches!(store.bars_until(0), Err(StoreError::NoTable)));
        assert!(matches!(store.row_count(), Err(StoreError::NoTable)));
    }

    #[test]
    fn range_query_hides_future_bars() {
        let store = loaded(&minute_bars());
        let visible = store.bars_until(120).unwrap();
        assert_eq!(visible.iter().map(|b| b.time).collect::<Vec<_>>(), vec![0, 60, 120]);
        assert_eq!(visible[1], minute_bars()[1]);
        assert!(store.bars_until(-1).unwrap().is_empty());
    }

    #[test]
    fn aggregate_five_minute_bucket() {
        let input = minute_bars();
        let store = loaded(&input[..5]);
        let agg = store.aggregate_until(10_000, Timeframe::minutes(5)).unwrap();
        assert_eq!(agg, vec![Bar::new(0, 10.0, 15.0, 7.0, 12.0, 15.0)]);
    }

    #[test]
    fn aggregate_splits_buckets_and_respects_cursor() {
        let store = loaded(&minute_bars());
        let agg = store.aggregate_until(300, Timeframe::minutes(5)).unwrap();
        assert_eq!(agg.len(), 2);
        assert_eq!(agg[0].time, 0);
        assert_eq!(agg[1], Bar::new(300, 12.0, 12.0, 11.0, 11.5, 6.0));

        let partial = store.aggregate_until(60, Timeframe::minutes(5)).unwrap();
        assert_eq!(partial, vec![Bar::new(0, 10.0, 15.0, 9.0, 14.0, 3.0)]);
    }

    #[test]
    fn duplicates_are_stored_but_collapse_last_wins() {
        let store = loaded(&[
            Bar::new(0, 1.0, 1.0, 1.0, 1.0, 1.0),
            Bar::new(60, 2.0, 2.0, 2.0, 2.0, 1.0),
            Bar::new(60, 3.0, 3.0, 3.0, 3.0, 1.0),
        ]);
        assert_eq!(store.row_count().unwrap(), 3);
        assert_eq!(store.distinct_times().unwrap(), vec![0, 60]);
        let visible = store.bars_until(60).unwrap();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[1].open, 3.0);
    }

    #[test]
    fn create_table_replaces_contents() {
        let mut store = loaded(&minute_bars());
        store.create_table().unwrap();
        assert_eq!(store.row_count().unwrap(), 0);
        store.insert_batch(&minute_bars()[..1]).unwrap();
        assert_eq!(store.distinct_times().unwrap(), vec![0]);
    }
}
