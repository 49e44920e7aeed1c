// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Optimistic writes, offline queueing and replay.

mod util;

use airbag::NetworkErrorKind;
use bytes::Bytes;
use lifeboat::{CachePolicy, Error, Event, MutationOutcome, MutationRequest, ReadRequest};
use outbox::{Connectivity, FailureCause, OfflineQueueOptions, QueueEvent};
use util::{Harness, Origin, next_matching, single_attempt};
use uuid::Uuid;

const ENDPOINT: &str = "api.example.com";

fn post() -> ReadRequest {
    ReadRequest::new(ENDPOINT, "post:42")
}

fn like(payload: &'static str) -> MutationRequest<String> {
    MutationRequest::new(ENDPOINT, payload)
        .dedupe_key("like:42")
        .optimistic(post().key(), format!("post 42 ({payload})"))
}

fn queued_id(outcome: MutationOutcome) -> Uuid {
    match outcome {
        MutationOutcome::Queued(id) => id,
        MutationOutcome::Applied => panic!("expected the mutation to be queued"),
    }
}

#[tokio::test]
async fn online_mutation_is_applied() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;

    let outcome = lifeboat.mutate(like("like")).await.unwrap();

    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(harness.transport.sent(), [(ENDPOINT.to_owned(), Bytes::from_static(b"like"))]);
    assert!(lifeboat.queue().is_empty());
}

#[tokio::test]
async fn optimistic_value_is_readable_right_away() {
    let harness = Harness::new(Connectivity::Disconnected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();

    lifeboat.mutate(like("like")).await.unwrap();

    let response = lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();
    assert_eq!(response.value(), "post 42 (like)");
    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn offline_mutation_is_replayed_on_reconnect() {
    let harness = Harness::new(Connectivity::Disconnected);
    let lifeboat = harness.build(single_attempt()).await;
    let mut queue_events = lifeboat.queue().subscribe();

    let id = queued_id(lifeboat.mutate(like("like")).await.unwrap());
    assert_eq!(lifeboat.queue().len(), 1);
    assert!(harness.transport.sent().is_empty());

    harness.connectivity.set(Connectivity::Connected);
    next_matching(&mut queue_events, |event| matches!(event, QueueEvent::Acked { id: acked } if *acked == id)).await;

    assert_eq!(harness.transport.sent(), [(ENDPOINT.to_owned(), Bytes::from_static(b"like"))]);
    assert!(lifeboat.queue().is_empty());
}

#[tokio::test]
async fn latest_intent_wins_for_a_dedupe_key() {
    let harness = Harness::new(Connectivity::Disconnected);
    let lifeboat = harness.build(single_attempt()).await;
    let mut queue_events = lifeboat.queue().subscribe();

    lifeboat.mutate(like("like")).await.unwrap();
    let id = queued_id(lifeboat.mutate(like("unlike")).await.unwrap());
    assert_eq!(lifeboat.queue().len(), 1);

    harness.connectivity.set(Connectivity::Connected);
    next_matching(&mut queue_events, |event| matches!(event, QueueEvent::Acked { id: acked } if *acked == id)).await;

    assert_eq!(harness.transport.sent(), [(ENDPOINT.to_owned(), Bytes::from_static(b"unlike"))]);
}

#[tokio::test]
async fn rejected_mutation_reverts_the_optimistic_value() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    harness.transport.respond_with([Err(NetworkErrorKind::Unauthorized)]);

    let error = lifeboat.mutate(like("like")).await.unwrap_err();

    assert!(matches!(error, Error::Network(NetworkErrorKind::Unauthorized)));
    assert!(lifeboat.queue().is_empty());
    let error = lifeboat.get(&post(), CachePolicy::CacheOnly, origin.fetcher()).await.unwrap_err();
    assert!(matches!(error, Error::NotFound));
}

#[tokio::test]
async fn retryable_online_failure_is_queued_and_replayed() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let mut queue_events = lifeboat.queue().subscribe();
    harness.transport.respond_with([Err(NetworkErrorKind::ServerError(503))]);

    let id = queued_id(lifeboat.mutate(like("like")).await.unwrap());

    next_matching(&mut queue_events, |event| matches!(event, QueueEvent::Acked { id: acked } if *acked == id)).await;
    assert_eq!(harness.transport.sent().len(), 2);
}

#[tokio::test]
async fn pending_dedupe_key_queues_behind_the_earlier_mutation() {
    let harness = Harness::new(Connectivity::Disconnected);
    let lifeboat = harness.build(single_attempt()).await;

    lifeboat.mutate(like("like")).await.unwrap();
    lifeboat.shutdown().await;
    harness.connectivity.set(Connectivity::Connected);

    let id = queued_id(lifeboat.mutate(like("unlike")).await.unwrap());

    assert!(harness.transport.sent().is_empty());
    let pending = lifeboat.queue().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id(), id);
    assert_eq!(pending[0].payload(), &Bytes::from_static(b"unlike"));
}

#[tokio::test]
async fn queued_mutations_survive_a_restart() {
    let harness = Harness::new(Connectivity::Disconnected);
    let lifeboat = harness.build(single_attempt()).await;
    let id = queued_id(lifeboat.mutate(like("like")).await.unwrap());
    lifeboat.shutdown().await;
    drop(lifeboat);

    let restarted = harness.build(single_attempt()).await;
    assert_eq!(restarted.queue().pending()[0].id(), id);

    let mut queue_events = restarted.queue().subscribe();
    harness.connectivity.set(Connectivity::Connected);
    next_matching(&mut queue_events, |event| matches!(event, QueueEvent::Acked { id: acked } if *acked == id)).await;
    assert_eq!(harness.transport.sent().len(), 1);
}

#[tokio::test]
async fn exhausted_mutation_is_reported() {
    let harness = Harness::new(Connectivity::Disconnected);
    let options = single_attempt().queue(OfflineQueueOptions::default().max_attempts(1));
    let lifeboat = harness.build(options).await;
    let mut events = lifeboat.subscribe();
    harness.transport.respond_with([Err(NetworkErrorKind::ServerError(503))]);

    let id = queued_id(lifeboat.mutate(like("like")).await.unwrap());
    next_matching(&mut events, |event| matches!(event, Event::MutationQueued { .. })).await;

    harness.connectivity.set(Connectivity::Connected);
    let failed = next_matching(&mut events, |event| matches!(event, Event::MutationFailed(_))).await;

    let Event::MutationFailed(error) = failed else {
        unreachable!();
    };
    assert_eq!(error.id(), id);
    assert_eq!(error.dedupe_key(), Some("like:42"));
    assert!(matches!(error.cause(), FailureCause::AttemptsExhausted));
    assert!(lifeboat.queue().is_empty());
}

#[tokio::test]
async fn replay_rejection_is_reported_without_retrying() {
    let harness = Harness::new(Connectivity::Disconnected);
    let lifeboat = harness.build(single_attempt()).await;
    let mut events = lifeboat.subscribe();
    harness.transport.respond_with([Err(NetworkErrorKind::Malformed)]);

    let id = queued_id(lifeboat.mutate(like("like")).await.unwrap());
    harness.connectivity.set(Connectivity::Connected);

    let failed = next_matching(&mut events, |event| matches!(event, Event::MutationFailed(_))).await;
    let Event::MutationFailed(error) = failed else {
        unreachable!();
    };
    assert_eq!(error.id(), id);
    assert!(matches!(error.cause(), FailureCause::Rejected));
    assert_eq!(harness.transport.sent().len(), 1);
}

#[tokio::test]
async fn mutation_without_optimistic_value_leaves_the_cache_alone() {
    let harness = Harness::new(Connectivity::Connected);
    let lifeboat = harness.build(single_attempt()).await;
    let origin = Origin::new();
    lifeboat.get(&post(), CachePolicy::CacheFirst, origin.fetcher()).await.unwrap();

    let outcome = lifeboat.mutate(MutationRequest::new(ENDPOINT, "comment")).await.unwrap();

    assert_eq!(outcome, MutationOutcome::Applied);
    let cached = lifeboat.get(&post(), CachePolicy::CacheOnly, origin.fetcher()).await.unwrap();
    assert_eq!(cached.value(), "fresh");
}
