//! Refresh poller: periodically pulls current quotes and commits them to the cache.
//!
//! The poller is a two-state machine (`Idle` <-> `Fetching`) driven by a
//! `crossbeam_channel::tick` on a dedicated thread, so cycles never overlap. One cycle:
//!
//! 1. fetch current records for the configured instruments;
//! 2. on fetch failure, log and give up until the next tick (nothing is written);
//! 3. otherwise stamp the whole batch with one ingestion timestamp, skip records without
//!    a usable `id` or `price`, and record every valid quote;
//! 4. a failed write is logged and counted; the rest of the batch still goes through.
//!
//! [`RefreshPoller::start`] returns a [`PollerHandle`]; [`PollerHandle::stop`] (or
//! dropping the handle) signals the thread and joins it.
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Sender, bounded, select, tick};
use log::{debug, error, info, warn};
use price_common::instruments::validate_id;
use price_common::store::OrderedStore;
use price_common::{CacheError, Quote};

use crate::cache::InstrumentCache;
use crate::source::{MarketRecord, QuoteSource};

/// Poll interval used when none is configured.
pub const DEFAULT_INTERVAL_MILLIS: u64 = 30_000;

const UNKNOWN_NAME: &str = "Unknown";
const UNKNOWN_SYMBOL: &str = "N/A";

/// Where the poller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next tick.
    Idle,
    /// A fetch-and-commit cycle is in flight.
    Fetching,
}

/// Outcome of one successful fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Ingestion timestamp shared by every quote of the batch.
    pub timestamp: u64,
    /// Records returned by the source.
    pub fetched: usize,
    /// Quotes committed to the cache.
    pub written: usize,
    /// Records dropped by validation.
    pub skipped: usize,
    /// Valid quotes whose write failed.
    pub failed: usize,
}

type Clock = Box<dyn Fn() -> u64 + Send>;

fn wall_clock_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Fetches quotes from a [`QuoteSource`] and writes them into an [`InstrumentCache`].
pub struct RefreshPoller<S: OrderedStore, Q: QuoteSource> {
    cache: Arc<InstrumentCache<S>>,
    source: Q,
    instruments: Vec<String>,
    state: PollState,
    last_timestamp: Option<u64>,
    clock: Clock,
}

impl<S, Q> RefreshPoller<S, Q>
where
    S: OrderedStore + 'static,
    Q: QuoteSource + 'static,
{
    /// Create a poller for `instruments`, stamping batches with the wall clock.
    pub fn new(cache: Arc<InstrumentCache<S>>, source: Q, instruments: Vec<String>) -> Self {
        Self {
            cache,
            source,
            instruments,
            state: PollState::Idle,
            last_timestamp: None,
            clock: Box::new(wall_clock_millis),
        }
    }

    /// Replace the timestamp source (epoch millis).
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Runs one fetch-and-commit cycle. Returns `Err` only when the fetch failed, in
    /// which case nothing was written.
    pub fn run_cycle(&mut self) -> Result<CycleReport, CacheError> {
        self.state = PollState::Fetching;
        let result = self.fetch_and_commit();
        self.state = PollState::Idle;
        result
    }

    fn fetch_and_commit(&mut self) -> Result<CycleReport, CacheError> {
        let records = self.source.fetch(&self.instruments)?;
        if records.is_empty() {
            return Err(CacheError::Upstream(String::from("no data received")));
        }

        let timestamp = self.next_timestamp();
        let mut report = CycleReport {
            timestamp,
            fetched: records.len(),
            ..CycleReport::default()
        };

        for record in records {
            let Some(quote) = normalize(&record, timestamp) else {
                warn!("Skipping invalid entry: {:?}", record);
                report.skipped += 1;
                continue;
            };
            match self.cache.record_quote(&quote) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    error!("Failed to record {}: {}", quote.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Batch timestamps are strictly increasing so history entries never collide, even if
    /// the wall clock stalls or steps back.
    fn next_timestamp(&mut self) -> u64 {
        let now = (self.clock)();
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Moves the poller onto its own thread, running a cycle every `interval`.
    pub fn start(mut self, interval: Duration) -> Result<PollerHandle, CacheError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let join = thread::Builder::new()
            .name(String::from("refresh-poller"))
            .spawn(move || {
                info!("Refresh poller started, interval {:?}", interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => match self.run_cycle() {
                            Ok(report) => info!(
                                "Prices updated at {}: {} written, {} skipped, {} failed",
                                report.timestamp, report.written, report.skipped, report.failed
                            ),
                            Err(e) => error!("Error fetching prices: {}", e),
                        },
                    }
                }
                info!("Refresh poller stopped");
            })?;

        Ok(PollerHandle {
            stop_tx,
            join: Some(join),
        })
    }
}

/// Turns a raw record into a quote, or `None` if `id` or `price` is unusable.
fn normalize(record: &MarketRecord, timestamp: u64) -> Option<Quote> {
    let id = record.id.as_deref()?;
    if validate_id(id).is_err() {
        return None;
    }
    let price = record.current_price.filter(|p| p.is_finite())?;
    Some(Quote {
        id: id.to_string(),
        name: record.name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        symbol: record.symbol.clone().unwrap_or_else(|| UNKNOWN_SYMBOL.to_string()),
        price,
        timestamp,
    })
}

/// Cancellable handle to a running poller thread.
pub struct PollerHandle {
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Signals the poller to stop and waits for it. An in-flight cycle completes first.
    pub fn stop(mut self) -> Result<(), CacheError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), CacheError> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        // A full channel means a stop is already pending.
        let _ = self.stop_tx.try_send(());
        join.join()
            .map_err(|_| CacheError::ChannelRecv(String::from("refresh poller panicked")))?;
        debug!("Refresh poller joined");
        Ok(())
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Poller shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use price_common::store::MemoryStore;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Replays scripted fetch results, one per cycle; repeats the last one afterwards.
    struct ScriptedSource {
        script: Mutex<Vec<Result<Vec<MarketRecord>, String>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<MarketRecord>, String>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl QuoteSource for ScriptedSource {
        fn fetch(&self, _instruments: &[String]) -> Result<Vec<MarketRecord>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            };
            next.map_err(CacheError::Upstream)
        }
    }

    fn record(id: &str, price: Option<f64>) -> MarketRecord {
        MarketRecord {
            id: Some(id.to_string()),
            name: Some(id.to_uppercase()),
            symbol: None,
            current_price: price,
        }
    }

    fn poller(
        source: ScriptedSource,
        clock: Arc<AtomicU64>,
    ) -> (Arc<InstrumentCache<MemoryStore>>, RefreshPoller<MemoryStore, ScriptedSource>) {
        let cache = Arc::new(InstrumentCache::new(MemoryStore::new()));
        let poller = RefreshPoller::new(
            Arc::clone(&cache),
            source,
            vec!["bitcoin".into(), "ethereum".into(), "ripple".into()],
        )
        .with_clock(move || clock.load(Ordering::SeqCst));
        (cache, poller)
    }

    #[test]
    fn cycle_writes_latest_and_history_for_each_quote() {
        let clock = Arc::new(AtomicU64::new(1_000));
        let source = ScriptedSource::new(vec![Ok(vec![
            record("bitcoin", Some(50_000.0)),
            record("ethereum", Some(3_000.0)),
        ])]);
        let (cache, mut poller) = poller(source, clock);

        let report = poller.run_cycle().unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(poller.state(), PollState::Idle);

        let latest = cache.get_latest(["bitcoin", "ripple"]).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["bitcoin"].price, 50_000.0);
        assert_eq!(latest["bitcoin"].symbol, "N/A");

        let history = cache.get_history(["bitcoin", "ethereum"], 1_000, 1_000).unwrap();
        assert_eq!(history["bitcoin"].len(), 1);
        assert_eq!(history["ethereum"][0].price, 3_000.0);
        assert_eq!(history["ethereum"][0].timestamp, 1_000);
    }

    #[test]
    fn consecutive_cycles_build_history() {
        let clock = Arc::new(AtomicU64::new(1_000));
        let source = ScriptedSource::new(vec![
            Ok(vec![record("bitcoin", Some(50_000.0))]),
            Ok(vec![record("bitcoin", Some(51_000.0))]),
        ]);
        let (cache, mut poller) = poller(source, Arc::clone(&clock));

        poller.run_cycle().unwrap();
        clock.store(31_000, Ordering::SeqCst);
        poller.run_cycle().unwrap();

        assert_eq!(cache.get_latest(["bitcoin"]).unwrap()["bitcoin"].price, 51_000.0);
        let history = cache.get_history(["bitcoin"], 1_000, 31_000).unwrap();
        let prices: Vec<f64> = history["bitcoin"].iter().map(|q| q.price).collect();
        assert_eq!(prices, vec![50_000.0, 51_000.0]);
    }

    #[test]
    fn invalid_records_are_skipped_not_fatal() {
        let clock = Arc::new(AtomicU64::new(5));
        let source = ScriptedSource::new(vec![Ok(vec![
            record("bitcoin", None),
            MarketRecord::default(),
            record("bad:id", Some(1.0)),
            record("solana", Some(f64::NAN)),
            record("cardano", Some(0.4)),
        ])]);
        let (cache, mut poller) = poller(source, clock);

        let report = poller.run_cycle().unwrap();
        assert_eq!(report.fetched, 5);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.written, 1);
        assert_eq!(cache.get_latest(["cardano"]).unwrap()["cardano"].name, "CARDANO");
    }

    #[test]
    fn mistyped_record_does_not_cost_the_batch() {
        let clock = Arc::new(AtomicU64::new(5));
        let body = r#"[{"id":"bitcoin","current_price":50000},{"id":"ethereum","current_price":"n/a"}]"#;
        let records: Vec<MarketRecord> = serde_json::from_str(body).unwrap();
        let (cache, mut poller) = poller(ScriptedSource::new(vec![Ok(records)]), clock);

        let report = poller.run_cycle().unwrap();
        assert_eq!((report.written, report.skipped), (1, 1));
        let latest = cache.get_latest(["bitcoin", "ethereum"]).unwrap();
        assert_eq!(latest["bitcoin"].price, 50_000.0);
        assert!(!latest.contains_key("ethereum"));
    }

    /// Fails every put whose key mentions `rejected`.
    struct RejectingStore {
        inner: MemoryStore,
        rejected: &'static str,
    }

    impl OrderedStore for RejectingStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
            if String::from_utf8_lossy(key).contains(self.rejected) {
                return Err(CacheError::Store(String::from("disk full")));
            }
            self.inner.put(key, value)
        }

        fn scan(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<price_common::store::Entry>, CacheError> {
            self.inner.scan(lower, upper)
        }
    }

    #[test]
    fn write_failure_is_counted_and_the_cycle_continues() {
        let cache = Arc::new(InstrumentCache::new(RejectingStore {
            inner: MemoryStore::new(),
            rejected: "ethereum",
        }));
        let source = ScriptedSource::new(vec![Ok(vec![
            record("bitcoin", Some(50_000.0)),
            record("ethereum", Some(3_000.0)),
            record("ripple", Some(0.5)),
        ])]);
        let mut poller = RefreshPoller::new(Arc::clone(&cache), source, vec!["bitcoin".into()])
            .with_clock(|| 9);

        let report = poller.run_cycle().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.written, 2);
        assert_eq!(poller.state(), PollState::Idle);

        let latest = cache.get_latest(["bitcoin", "ethereum", "ripple"]).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(!latest.contains_key("ethereum"));
        assert_eq!(cache.get_history(["ripple"], 9, 9).unwrap()["ripple"].len(), 1);
    }

    #[test]
    fn fetch_failure_writes_nothing() {
        let clock = Arc::new(AtomicU64::new(5));
        let source = ScriptedSource::new(vec![Err(String::from("unreachable"))]);
        let (cache, mut poller) = poller(source, clock);

        assert!(matches!(poller.run_cycle(), Err(CacheError::Upstream(_))));
        assert_eq!(poller.state(), PollState::Idle);
        assert!(cache.store().is_empty().unwrap());
    }

    #[test]
    fn empty_fetch_is_an_upstream_failure() {
        let clock = Arc::new(AtomicU64::new(5));
        let (cache, mut poller) = poller(ScriptedSource::new(vec![Ok(Vec::new())]), clock);
        assert!(matches!(poller.run_cycle(), Err(CacheError::Upstream(_))));
        assert!(cache.store().is_empty().unwrap());
    }

    #[test]
    fn stalled_clock_still_yields_distinct_history_entries() {
        let clock = Arc::new(AtomicU64::new(7_000));
        let source = ScriptedSource::new(vec![Ok(vec![record("bitcoin", Some(1.0))])]);
        let (cache, mut poller) = poller(source, clock);

        let first = poller.run_cycle().unwrap().timestamp;
        let second = poller.run_cycle().unwrap().timestamp;
        assert!(second > first);
        assert_eq!(cache.get_history(["bitcoin"], 0, u64::MAX).unwrap()["bitcoin"].len(), 2);
    }

    #[test]
    fn started_poller_ticks_and_stops() {
        let clock = Arc::new(AtomicU64::new(1));
        let source = ScriptedSource::new(vec![Ok(vec![record("bitcoin", Some(1.0))])]);
        let calls = Arc::clone(&source.calls);
        let (cache, poller) = poller(source, clock);

        let handle = poller.start(Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(150));
        handle.stop().unwrap();

        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        assert!(cache.get_latest(["bitcoin"]).unwrap().contains_key("bitcoin"));

        thread::sleep(Duration::from_millis(60));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }
}
