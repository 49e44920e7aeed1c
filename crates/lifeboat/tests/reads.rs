// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reads through the cache, the fetch coordinator, retries and circuit breakers.

mod util;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use airbag::{BreakerOptions, NetworkErrorKind, RetryPolicy};
use lifeboat::{CachePolicy, Error, Event, ReadRequest, Source};
use outbox::Connectivity;
use parking_lot::Mutex;
use rstest::rstest;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use util::{Harness, Origin, next_matching, single_attempt};

fn post() -> ReadRequest {
    ReadRequest::new("api.example.com", "post:42")
}

#[tokio::test]
async fn cache_first_fetches_once() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();

    let first = lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    let second = lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();

    assert_eq!(first.source(), Source::Network);
    assert_eq!(second.source(), Source::Cache);
    assert_eq!(second.value(), "fresh");
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn cache_only_miss_is_not_found() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();

    let error = lifeboat.get(&post(), CachePolicy::CacheOnly, origin.fetcher()).await.unwrap_err();

    assert!(matches!(error, Error::NotFound));
    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn network_only_always_fetches() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    origin.respond_with([Ok("v1".to_owned()), Ok("v2".to_owned())]);

    let first = lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap();
    let second = lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap();

    assert_eq!(first.value(), "v1");
    assert_eq!(second.value(), "v2");
    assert_eq!(second.source(), Source::Network);
    assert_eq!(origin.calls(), 2);

    // The latest value is cached.
    let cached = lifeboat.get(&post(), CachePolicy::CacheOnly, origin.fetcher()).await.unwrap();
    assert_eq!(cached.value(), "v2");
}

#[tokio::test]
async fn request_ttl_bounds_the_cached_value() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    let request = post().ttl(Duration::from_secs(5));

    lifeboat.get(&request, CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();

    harness.control.advance(Duration::from_secs(3));
    let cached = lifeboat.get(&request, CachePolicy::CacheOnly, origin.fetcher()).await.unwrap();
    assert_eq!(cached.value(), "fresh");

    harness.control.advance(Duration::from_secs(3));
    let error = lifeboat.get(&request, CachePolicy::CacheOnly, origin.fetcher()).await.unwrap_err();
    assert!(matches!(error, Error::NotFound));
}

#[tokio::test]
async fn variants_are_cached_separately() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    origin.respond_with([Ok("page 1".to_owned()), Ok("page 2".to_owned())]);

    let feed = ReadRequest::new("api.example.com", "feed");
    lifeboat.get(&feed.clone().variant("page", "1"), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    lifeboat.get(&feed.clone().variant("page", "2"), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();

    let first = lifeboat.get(&feed.variant("page", "1"), CachePolicy::CacheOnly, origin.fetcher()).await.unwrap();
    assert_eq!(first.value(), "page 1");
    assert_eq!(origin.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_misses_share_one_fetch() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::gated();
    let mut events = lifeboat.subscribe();

    let readers: Vec<_> = (0..5)
        .map(|_| {
            let lifeboat = lifeboat.clone();
            let fetcher = origin.fetcher();
            tokio::spawn(async move { lifeboat.get(&post(), CachePolicy::CacheFirst, fetcher).await })
        })
        .collect();

    for _ in 0..4 {
        next_matching(&mut events, |event| matches!(event, Event::FetchCoalesced { .. })).await;
    }
    origin.release();

    for reader in readers {
        let response = reader.await.unwrap().unwrap();
        assert_eq!(response.value(), "fresh");
        assert_eq!(response.source(), Source::Network);
    }
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn network_first_falls_back_when_the_network_is_down() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    origin.respond_with([Err(NetworkErrorKind::ConnectionLost)]);

    let response = lifeboat.get(&post(), CachePolicy::NetworkFirst, origin.fetcher()).await.unwrap();

    assert_eq!(response.source(), Source::StaleFallback);
    assert_eq!(response.value(), "fresh");
}

#[tokio::test]
async fn network_first_without_cached_value_surfaces_the_error() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    origin.respond_with([Err(NetworkErrorKind::Timeout)]);

    let error = lifeboat.get(&post(), CachePolicy::NetworkFirst, origin.fetcher()).await.unwrap_err();

    assert!(matches!(error, Error::Network(NetworkErrorKind::Timeout)));
}

#[rstest]
#[case::unauthorized(NetworkErrorKind::Unauthorized)]
#[case::malformed(NetworkErrorKind::Malformed)]
#[case::not_found(NetworkErrorKind::ServerError(404))]
#[tokio::test]
async fn terminal_failures_never_fall_back(#[case] kind: NetworkErrorKind) {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    origin.respond_with([Err(kind)]);

    let error = lifeboat.get(&post(), CachePolicy::NetworkFirst, origin.fetcher()).await.unwrap_err();

    assert!(matches!(error, Error::Network(actual) if actual == kind));
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error() {
    let harness = Harness::auto_advancing(Connectivity::Connected);
    let options = single_attempt().retry(RetryPolicy::Fixed {
        delay: Duration::from_millis(100),
        max_attempts: 3,
    });
    let lifeboat = harness.build(options).await;
    let origin = Origin::new();
    origin.respond_with([
        Err(NetworkErrorKind::Timeout),
        Err(NetworkErrorKind::Timeout),
        Err(NetworkErrorKind::ConnectionLost),
    ]);
    let mut events = lifeboat.subscribe();

    let error = lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap_err();

    assert!(matches!(error, Error::Network(NetworkErrorKind::ConnectionLost)));
    assert_eq!(origin.calls(), 3);

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::RetryAttempted { endpoint, delay, .. } = event {
            assert_eq!(&*endpoint, "api.example.com");
            delays.push(delay);
        }
    }
    assert_eq!(delays, [Duration::from_millis(100), Duration::from_millis(100)]);
}

#[tokio::test]
async fn retries_recover_from_transient_failures() {
    let harness = Harness::auto_advancing(Connectivity::Connected);
    let options = single_attempt().retry(RetryPolicy::Fixed {
        delay: Duration::from_millis(100),
        max_attempts: 3,
    });
    let lifeboat = harness.build(options).await;
    let origin = Origin::new();
    origin.respond_with([Err(NetworkErrorKind::ServerError(503))]);

    let response = lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap();

    assert_eq!(response.value(), "fresh");
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn open_circuit_short_circuits_fetches_until_reset() {
    let harness = Harness::new(Connectivity::Connected);
    let options = single_attempt().breaker(
        BreakerOptions::default()
            .failure_threshold(1)
            .success_threshold(1)
            .reset_timeout(Duration::from_secs(30)),
    );
    let lifeboat = harness.build(options).await;
    let origin = Origin::new();
    let mut events = lifeboat.subscribe();

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    origin.respond_with([Err(NetworkErrorKind::ServerError(503))]);

    // The failure opens the circuit and the cached value is served.
    let response = lifeboat.get(&post(), CachePolicy::NetworkFirst, origin.fetcher()).await.unwrap();
    assert_eq!(response.source(), Source::StaleFallback);
    let opened = next_matching(&mut events, |event| matches!(event, Event::CircuitOpened { .. })).await;
    assert_eq!(
        opened,
        Event::CircuitOpened {
            endpoint: "api.example.com".into()
        }
    );

    // While open the origin is not contacted at all.
    let response = lifeboat.get(&post(), CachePolicy::NetworkFirst, origin.fetcher()).await.unwrap();
    assert_eq!(response.source(), Source::StaleFallback);
    let error = lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap_err();
    assert!(matches!(error, Error::CircuitOpen(_)));
    assert_eq!(origin.calls(), 2);

    harness.control.advance(Duration::from_secs(31));
    let response = lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap();
    assert_eq!(response.source(), Source::Network);
    next_matching(&mut events, |event| matches!(event, Event::CircuitClosed { .. })).await;
    assert_eq!(origin.calls(), 3);
}

#[tokio::test]
async fn circuits_are_independent_per_endpoint() {
    let harness = Harness::new(Connectivity::Connected);
    let options = single_attempt().breaker(BreakerOptions::default().failure_threshold(1));
    let lifeboat = harness.build(options).await;
    let origin = Origin::new();
    origin.respond_with([Err(NetworkErrorKind::ServerError(500))]);

    lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap_err();

    let other = ReadRequest::new("cdn.example.com", "avatar:7");
    let response = lifeboat.get(&other, CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap();
    assert_eq!(response.value(), "fresh");
}

#[tokio::test]
async fn stale_while_revalidate_serves_recent_values_and_refreshes() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    origin.respond_with([Ok("v1".to_owned()), Ok("v2".to_owned())]);
    let policy = CachePolicy::StaleWhileRevalidate(Duration::from_secs(60));

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    harness.control.advance(Duration::from_secs(10));

    let response = lifeboat.get(&post(), policy, origin.fetcher()).await.unwrap();
    assert_eq!(response.source(), Source::Cache);
    assert_eq!(response.value(), "v1");

    util::eventually(|| origin.calls() == 2).await;
    let refreshed = loop {
        let cached = lifeboat.get(&post(), CachePolicy::CacheOnly, origin.fetcher()).await.unwrap();
        if cached.value() == "v2" {
            break cached;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(refreshed.created_at(), harness.control.to_clock().now());
}

#[tokio::test]
async fn stale_while_revalidate_fetches_in_the_foreground_when_too_old() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    origin.respond_with([Ok("v1".to_owned()), Ok("v2".to_owned())]);
    let policy = CachePolicy::StaleWhileRevalidate(Duration::from_secs(60));

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    harness.control.advance(Duration::from_secs(61));

    let response = lifeboat.get(&post(), policy, origin.fetcher()).await.unwrap();

    assert_eq!(response.source(), Source::Network);
    assert_eq!(response.value(), "v2");
}

#[tokio::test]
async fn stale_while_revalidate_falls_back_on_a_failed_foreground_fetch() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    let policy = CachePolicy::StaleWhileRevalidate(Duration::from_secs(60));

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    harness.control.advance(Duration::from_secs(120));
    origin.respond_with([Err(NetworkErrorKind::Timeout)]);

    let response = lifeboat.get(&post(), policy, origin.fetcher()).await.unwrap();

    assert_eq!(response.source(), Source::StaleFallback);
    assert_eq!(response.value(), "fresh");
}

#[tokio::test]
async fn background_revalidations_are_coalesced() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let seed = Origin::new();
    lifeboat.get(&post(), CachePolicy::CacheFirst, seed.fetcher()).await.unwrap();

    let origin = Origin::gated();
    let policy = CachePolicy::StaleWhileRevalidate(Duration::from_secs(60));
    for _ in 0..3 {
        let response = lifeboat.get(&post(), policy, origin.fetcher()).await.unwrap();
        assert_eq!(response.source(), Source::Cache);
    }

    util::eventually(|| origin.calls() == 1).await;
    origin.release();
    tokio::task::yield_now().await;
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn failed_fetch_keeps_the_cached_value() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    origin.respond_with([Err(NetworkErrorKind::Unauthorized)]);
    lifeboat.get(&post(), CachePolicy::NetworkOnly, origin.fetcher()).await.unwrap_err();

    let cached = lifeboat.get(&post(), CachePolicy::CacheOnly, origin.fetcher()).await.unwrap();
    assert_eq!(cached.value(), "fresh");
}

#[tokio::test]
async fn lookups_report_hits_and_misses() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    let mut events = lifeboat.subscribe();

    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();

    let key = post().key();
    assert_eq!(events.try_recv().unwrap(), Event::CacheMiss { key: key.clone() });
    assert_eq!(events.try_recv().unwrap(), Event::CacheHit { key });
}

/// Collects formatted log lines.
#[derive(Debug, Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn output(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl MakeWriter<'_> for LogCapture {
    type Writer = Self;

    fn make_writer(&self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn fetch_duration_is_logged_on_the_injected_clock() {
    let logs = LogCapture::default();
    let _subscriber = tracing::subscriber::set_default(
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(logs.clone()).with_ansi(false)),
    );
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;

    let control = harness.control.clone();
    let slow_fetch = move || {
        control.advance(Duration::from_millis(250));
        async { Ok::<_, NetworkErrorKind>("slow".to_owned()) }
    };
    lifeboat.get(&post(), CachePolicy::NetworkOnly, slow_fetch).await.unwrap();

    let output = logs.output();
    assert!(output.contains("fetch succeeded"), "{output}");
    assert!(output.contains("fetch.duration=250ms"), "{output}");
}
