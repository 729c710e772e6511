use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use price_common::identity::Identity;
use price_common::protocol::{ErrorBody, HistoryQuery, Method, Ping, Request, Response};
use price_common::store::{LogStore, MemoryStore, OrderedStore};
use price_common::transport::{StaticResolver, Transport, UdpTransport};
use price_common::{CacheError, Quote};
use price_server::source::{MarketRecord, QuoteSource};
use price_server::{DispatchTable, InstrumentCache, ListenerHandle, RefreshPoller, RpcListener};

struct FixedSource(Vec<(String, f64)>);

impl QuoteSource for FixedSource {
    fn fetch(&self, _instruments: &[String]) -> Result<Vec<MarketRecord>, CacheError> {
        Ok(self
            .0
            .iter()
            .map(|(id, price)| MarketRecord {
                id: Some(id.clone()),
                name: Some(id.clone()),
                symbol: Some(id[..3].to_string()),
                current_price: Some(*price),
            })
            .collect())
    }
}

fn serve<S: OrderedStore + 'static>(
    cache: Arc<InstrumentCache<S>>,
) -> (ListenerHandle, UdpTransport<StaticResolver>, price_common::identity::PublicId) {
    let listener =
        RpcListener::bind("127.0.0.1:0", Identity::generate(), DispatchTable::for_cache(cache))
            .unwrap();
    let public_id = listener.public_id();
    let handle = listener.start().unwrap();
    let resolver = StaticResolver::new().with_peer(public_id, handle.local_addr());
    let client = UdpTransport::bind("127.0.0.1:0", resolver, Duration::from_secs(2)).unwrap();
    (handle, client, public_id)
}

fn call(
    client: &UdpTransport<StaticResolver>,
    target: &price_common::identity::PublicId,
    request: &Request,
) -> Response {
    let method = request.method();
    let reply = client
        .request(target, &method.to_string(), &request.encode().unwrap())
        .unwrap();
    Response::decode(method, &reply).unwrap()
}

#[test]
fn ping_round_trip() {
    let cache = Arc::new(InstrumentCache::new(MemoryStore::new()));
    let (handle, client, server) = serve(cache);

    let response = call(&client, &server, &Request::Ping(Ping { nonce: 126 }));
    assert_eq!(response, Response::Pong(Ping { nonce: 127 }));
    handle.stop().unwrap();
}

#[test]
fn polled_prices_are_served() {
    let clock = Arc::new(AtomicU64::new(1_000));
    let cache = Arc::new(InstrumentCache::new(MemoryStore::new()));
    let tick = Arc::clone(&clock);
    let mut first = RefreshPoller::new(
        Arc::clone(&cache),
        FixedSource(vec![("bitcoin".into(), 50_000.0), ("ethereum".into(), 3_000.0)]),
        vec!["bitcoin".into(), "ethereum".into()],
    )
    .with_clock(move || tick.load(Ordering::SeqCst));
    first.run_cycle().unwrap();

    clock.store(31_000, Ordering::SeqCst);
    let tick = Arc::clone(&clock);
    let mut second = RefreshPoller::new(
        Arc::clone(&cache),
        FixedSource(vec![("bitcoin".into(), 51_000.0)]),
        vec!["bitcoin".into()],
    )
    .with_clock(move || tick.load(Ordering::SeqCst));
    second.run_cycle().unwrap();

    let (handle, client, server) = serve(cache);

    let latest = match call(
        &client,
        &server,
        &Request::GetLatestPrices(vec!["bitcoin".into(), "ripple".into()]),
    ) {
        Response::LatestPrices(prices) => prices,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(latest.len(), 1);
    assert_eq!(latest["bitcoin"].price, 51_000.0);

    let history = match call(
        &client,
        &server,
        &Request::GetHistoricalPrices(HistoryQuery {
            pairs: vec!["bitcoin".into(), "ethereum".into(), "ripple".into()],
            from: 1_000,
            to: 31_000,
        }),
    ) {
        Response::HistoricalPrices(prices) => prices,
        other => panic!("unexpected response {:?}", other),
    };
    let btc: Vec<f64> = history["bitcoin"].iter().map(|q| q.price).collect();
    assert_eq!(btc, vec![50_000.0, 51_000.0]);
    assert_eq!(history["ethereum"].len(), 1);
    assert!(history["ripple"].is_empty());
    handle.stop().unwrap();
}

#[test]
fn malformed_payload_gets_error_body() {
    let cache = Arc::new(InstrumentCache::new(MemoryStore::new()));
    let (handle, client, server) = serve(cache);

    for method in [Method::Ping, Method::GetLatestPrices, Method::GetHistoricalPrices] {
        let reply = client
            .request(&server, &method.to_string(), b"not json at all")
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&reply).unwrap();
        assert!(!body.error.is_empty());
    }
    handle.stop().unwrap();
}

#[test]
fn hostile_length_prefix_does_not_stop_the_listener() {
    let cache = Arc::new(InstrumentCache::new(MemoryStore::new()));
    let (handle, client, server) = serve(cache);
    assert_eq!(
        call(&client, &server, &Request::Ping(Ping { nonce: 1 })),
        Response::Pong(Ping { nonce: 2 })
    );

    // Request frame for this server whose method claims u64::MAX, then 2^40, bytes.
    let attacker = UdpSocket::bind("127.0.0.1:0").unwrap();
    for claimed in [u64::MAX, 1u64 << 40] {
        let mut datagram = vec![0u8, 0u8];
        datagram.extend_from_slice(server.as_bytes());
        datagram.push(0xFD);
        datagram.extend_from_slice(&claimed.to_le_bytes());
        attacker.send_to(&datagram, handle.local_addr()).unwrap();
    }

    assert_eq!(
        call(&client, &server, &Request::Ping(Ping { nonce: 3 })),
        Response::Pong(Ping { nonce: 4 })
    );
    handle.stop().unwrap();
}

#[test]
fn long_history_is_answered_in_full() {
    let cache = Arc::new(InstrumentCache::new(MemoryStore::new()));
    let start = 1_700_000_000_000u64;
    for n in 0..720u64 {
        cache
            .record_quote(&Quote {
                id: "bitcoin".into(),
                name: "Bitcoin".into(),
                symbol: "btc".into(),
                price: 50_000.0 + n as f64,
                timestamp: start + n * 30_000,
            })
            .unwrap();
    }
    let (handle, client, server) = serve(cache);

    let history = match call(
        &client,
        &server,
        &Request::GetHistoricalPrices(HistoryQuery {
            pairs: vec!["bitcoin".into()],
            from: start,
            to: start + 720 * 30_000,
        }),
    ) {
        Response::HistoricalPrices(prices) => prices,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(history["bitcoin"].len(), 720);
    assert_eq!(history["bitcoin"][719].price, 50_719.0);
    handle.stop().unwrap();
}

#[test]
fn request_for_another_identity_is_not_answered() {
    let cache = Arc::new(InstrumentCache::new(MemoryStore::new()));
    let (handle, _, _) = serve(cache);

    let impostor = Identity::generate().public_id();
    let resolver = StaticResolver::new().with_peer(impostor, handle.local_addr());
    let client = UdpTransport::bind("127.0.0.1:0", resolver, Duration::from_millis(400)).unwrap();
    let err = client.request(&impostor, "ping", br#"{"nonce":1}"#).unwrap_err();
    assert!(matches!(err, CacheError::Timeout(_)));
    handle.stop().unwrap();
}

#[test]
fn identity_and_quotes_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let first_id = {
        let store = Arc::new(LogStore::open(dir.path()).unwrap());
        let identity = Identity::load_or_create(store.as_ref(), "rpc-seed").unwrap();
        let cache = Arc::new(InstrumentCache::new(Arc::clone(&store)));
        let mut poller = RefreshPoller::new(
            cache,
            FixedSource(vec![("solana".into(), 150.0)]),
            vec!["solana".into()],
        )
        .with_clock(|| 42);
        poller.run_cycle().unwrap();
        identity.public_id()
    };

    let store = Arc::new(LogStore::open(dir.path()).unwrap());
    let identity = Identity::load_or_create(store.as_ref(), "rpc-seed").unwrap();
    assert_eq!(identity.public_id(), first_id);

    let cache = Arc::new(InstrumentCache::new(store));
    let (handle, client, server) = serve(cache);
    let latest = match call(&client, &server, &Request::GetLatestPrices(vec!["solana".into()])) {
        Response::LatestPrices(prices) => prices,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(latest["solana"].timestamp, 42);
    handle.stop().unwrap();
}
