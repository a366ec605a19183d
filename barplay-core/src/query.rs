//! Query facade: turns (cursor, timeframe) into a store query on a
//! background worker.
//!
//! Requests are fire-and-forget and tagged with a sequence number. The worker
//! only executes the newest request waiting in its channel, and the facade
//! discards any response older than the latest request it issued, so rapid
//! cursor movement resolves last-write-wins.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::domain::{Bar, Timeframe};
use crate::store::{StoreError, StoreHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRequest {
    pub seq: u64,
    /// `None` while no timestamp is active.
    pub cursor: Option<i64>,
    pub timeframe: Timeframe,
    /// Base resolution of the active session.
    pub base: Timeframe,
}

#[derive(Debug)]
pub struct QueryResponse {
    pub seq: u64,
    pub cursor: Option<i64>,
    pub timeframe: Timeframe,
    pub result: Result<Vec<Bar>, StoreError>,
}

enum QueryCommand {
    Fetch(QueryRequest),
    Shutdown,
}

/// Run one request synchronously against the store.
///
/// A timeframe equal to the base resolution is a plain range query, anything
/// else is aggregated. No cursor means no bars and no query.
pub fn run_query(store: &StoreHandle, request: &QueryRequest) -> Result<Vec<Bar>, StoreError> {
    let Some(cursor) = request.cursor else {
        return Ok(Vec::new());
    };
    if request.timeframe == request.base {
        store.bars_until(cursor)
    } else {
        store.aggregate_until(cursor, request.timeframe)
    }
}

pub struct QueryFacade {
    commands: Sender<QueryCommand>,
    responses: Receiver<QueryResponse>,
    latest: u64,
    base: Timeframe,
    handle: Option<JoinHandle<()>>,
}

impl QueryFacade {
    pub fn new(store: StoreHandle, base: Timeframe) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let handle = spawn_worker(store, cmd_rx, resp_tx);
        Self {
            commands: cmd_tx,
            responses: resp_rx,
            latest: 0,
            base,
            handle: Some(handle),
        }
    }

    /// Base resolution used to route later requests.
    pub fn set_base(&mut self, base: Timeframe) {
        self.base = base;
    }

    /// Discard every response to requests issued so far.
    ///
    /// Called when the table behind the store changes, so an answer computed
    /// for the old table (or for its cursor) is never delivered.
    pub fn invalidate(&mut self) {
        self.latest += 1;
        trace!(latest = self.latest, "pending queries invalidated");
    }

    /// Issue a request and return its sequence number.
    pub fn request(&mut self, cursor: Option<i64>, timeframe: Timeframe) -> u64 {
        self.latest += 1;
        let request = QueryRequest {
            seq: self.latest,
            cursor,
            timeframe,
            base: self.base,
        };
        trace!(seq = request.seq, ?cursor, %timeframe, "query issued");
        if self.commands.send(QueryCommand::Fetch(request)).is_err() {
            debug!("query worker gone, request dropped");
        }
        self.latest
    }

    /// Non-blocking: the response to the latest request, if it has arrived.
    ///
    /// Stale responses found in the channel are discarded.
    pub fn poll(&mut self) -> Option<QueryResponse> {
        let mut found = None;
        loop {
            match self.responses.try_recv() {
                Ok(resp) => {
                    if let Some(resp) = self.accept(resp) {
                        found = Some(resp);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return found,
            }
        }
    }

    /// Block up to `timeout` for the response to the latest request.
    pub fn wait_latest(&mut self, timeout: Duration) -> Option<QueryResponse> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(resp) => {
                    if let Some(resp) = self.accept(resp) {
                        return Some(resp);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn accept(&self, resp: QueryResponse) -> Option<QueryResponse> {
        if resp.seq == self.latest {
            Some(resp)
        } else {
            trace!(seq = resp.seq, latest = self.latest, "stale query response discarded");
            None
        }
    }
}

impl Drop for QueryFacade {
    fn drop(&mut self) {
        let _ = self.commands.send(QueryCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for QueryFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFacade")
            .field("latest", &self.latest)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

fn spawn_worker(
    store: StoreHandle,
    rx: Receiver<QueryCommand>,
    tx: Sender<QueryResponse>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("barplay-query".into())
        .spawn(move || worker_loop(store, rx, tx))
        .expect("failed to spawn query thread")
}

fn worker_loop(store: StoreHandle, rx: Receiver<QueryCommand>, tx: Sender<QueryResponse>) {
    loop {
        let mut request = match rx.recv() {
            Ok(QueryCommand::Fetch(request)) => request,
            Ok(QueryCommand::Shutdown) | Err(_) => break,
        };

        // Only the newest pending request matters.
        loop {
            match rx.try_recv() {
                Ok(QueryCommand::Fetch(newer)) => {
                    trace!(skipped = request.seq, "superseded query skipped");
                    request = newer;
                }
                Ok(QueryCommand::Shutdown) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }

        let result = run_query(&store, &request);
        if let Err(e) = &result {
            debug!(seq = request.seq, error = %e, "query failed");
        }
        let response = QueryResponse {
            seq: request.seq,
            cursor: request.cursor,
            timeframe: request.timeframe,
            result,
        };
        if tx.send(response).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BarStore, DEFAULT_BATCH_SIZE};
    use std::sync::{Arc, Mutex};

    const WAIT: Duration = Duration::from_secs(5);

    fn minute_bars(n: i64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::new(i * 60, 10.0 + i as f64, 20.0, 5.0, 11.0, 1.0))
            .collect()
    }

    fn loaded_store(n: i64) -> StoreHandle {
        let store = StoreHandle::polars();
        store.load(&minute_bars(n), DEFAULT_BATCH_SIZE).unwrap();
        store
    }

    /// Records which query kind each call used.
    #[derive(Default)]
    struct RecordingStore {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl BarStore for RecordingStore {
        fn name(&self) -> &str {
            "recording"
        }
        fn create_table(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
        fn insert_batch(&mut self, _: &[Bar]) -> Result<(), StoreError> {
            Ok(())
        }
        fn bars_until(&self, _: i64) -> Result<Vec<Bar>, StoreError> {
            self.calls.lock().unwrap().push("range");
            Ok(Vec::new())
        }
        fn aggregate_until(&self, _: i64, _: Timeframe) -> Result<Vec<Bar>, StoreError> {
            self.calls.lock().unwrap().push("aggregate");
            Ok(Vec::new())
        }
        fn distinct_times(&self) -> Result<Vec<i64>, StoreError> {
            Ok(Vec::new())
        }
        fn row_count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
        fn drop_table(&mut self) {}
    }

    #[test]
    fn routes_by_base_resolution() {
        let recording = RecordingStore::default();
        let calls = Arc::clone(&recording.calls);
        let store = StoreHandle::new(recording);
        let base = Timeframe::minutes(1);

        let range = QueryRequest { seq: 1, cursor: Some(0), timeframe: base, base };
        run_query(&store, &range).unwrap();
        let agg = QueryRequest { timeframe: Timeframe::minutes(5), ..range };
        run_query(&store, &agg).unwrap();
        let none = QueryRequest { cursor: None, ..agg };
        assert!(run_query(&store, &none).unwrap().is_empty());

        assert_eq!(*calls.lock().unwrap(), vec!["range", "aggregate"]);
    }

    #[test]
    fn latest_response_carries_its_cursor() {
        let mut facade = QueryFacade::new(loaded_store(10), Timeframe::minutes(1));
        let seq = facade.request(Some(180), Timeframe::minutes(1));
        let resp = facade.wait_latest(WAIT).unwrap();
        assert_eq!(resp.seq, seq);
        assert_eq!(resp.cursor, Some(180));
        assert_eq!(resp.result.unwrap().len(), 4);
    }

    #[test]
    fn rapid_requests_resolve_to_the_last_one() {
        let mut facade = QueryFacade::new(loaded_store(50), Timeframe::minutes(1));
        for i in 0..20 {
            facade.request(Some(i * 60), Timeframe::minutes(1));
        }
        let resp = facade.wait_latest(WAIT).unwrap();
        assert_eq!(resp.seq, 20);
        assert_eq!(resp.cursor, Some(19 * 60));
        assert_eq!(resp.result.unwrap().len(), 20);
        assert!(facade.poll().is_none());
    }

    #[test]
    fn invalidate_discards_in_flight_responses() {
        let mut facade = QueryFacade::new(loaded_store(10), Timeframe::minutes(1));
        facade.request(Some(540), Timeframe::minutes(1));
        facade.invalidate();
        assert!(facade.wait_latest(Duration::from_millis(300)).is_none());

        let seq = facade.request(Some(60), Timeframe::minutes(1));
        let resp = facade.wait_latest(WAIT).unwrap();
        assert_eq!(resp.seq, seq);
        assert_eq!(resp.result.unwrap().len(), 2);
    }

    #[test]
    fn no_cursor_yields_no_bars() {
        let mut facade = QueryFacade::new(StoreHandle::polars(), Timeframe::minutes(1));
        facade.request(None, Timeframe::minutes(5));
        let resp = facade.wait_latest(WAIT).unwrap();
        assert!(resp.result.unwrap().is_empty());
    }

    #[test]
    fn store_errors_are_reported() {
        let mut facade = QueryFacade::new(StoreHandle::polars(), Timeframe::minutes(1));
        facade.request(Some(0), Timeframe::minutes(1));
        let resp = facade.wait_latest(WAIT).unwrap();
        assert!(matches!(resp.result, Err(StoreError::NoTable)));
    }
}
