// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A social feed client that keeps working through a network outage:
//!
//! 1. Reads the feed while online and caches it
//! 2. Loses the network and keeps serving the cached feed
//! 3. Likes a post while offline; the like is queued
//! 4. Reconnects and replays the queued like

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use airbag::NetworkErrorKind;
use bytes::Bytes;
use lifeboat::{CachePolicy, Event, Lifeboat, MutationRequest, ReadRequest};
use outbox::{Connectivity, ConnectivitySignal, QueueEvent};
use stowage::MemoryStore;
use sundial::Clock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const ENDPOINT: &str = "api.example.com";

#[tokio::main]
async fn main() -> Result<(), lifeboat::Error> {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    let online = Arc::new(AtomicBool::new(true));
    let connectivity = ConnectivitySignal::new(Connectivity::Connected);

    let transport = {
        let online = Arc::clone(&online);
        move |endpoint: &str, payload: Bytes| {
            let result = if online.load(Ordering::SeqCst) {
                println!("server: {endpoint} <- {}", String::from_utf8_lossy(&payload));
                Ok(())
            } else {
                Err(NetworkErrorKind::ConnectionLost)
            };
            async move { result }
        }
    };

    let lifeboat: Lifeboat<String, _, _> =
        Lifeboat::builder(Clock::new_system(), MemoryStore::new(), transport, connectivity.clone())
            .build()
            .await?;

    let mut events = lifeboat.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::MutationQueued { id } => println!("event: mutation {id} queued"),
                Event::CircuitOpened { endpoint } => println!("event: circuit for {endpoint} opened"),
                Event::MutationFailed(error) => println!("event: {error}"),
                _ => {}
            }
        }
    });

    let feed = ReadRequest::new(ENDPOINT, "feed").variant("page", "1");
    let fetch_feed = {
        let online = Arc::clone(&online);
        move || {
            let online = online.load(Ordering::SeqCst);
            async move {
                if online {
                    Ok("post 42: hello world".to_owned())
                } else {
                    Err(NetworkErrorKind::ConnectionLost)
                }
            }
        }
    };

    let response = lifeboat.get(&feed, CachePolicy::NetworkFirst, fetch_feed.clone()).await?;
    println!("online read: {} ({:?})", response.value(), response.source());

    println!("-- network down --");
    online.store(false, Ordering::SeqCst);
    connectivity.set(Connectivity::Disconnected);

    let response = lifeboat.get(&feed, CachePolicy::NetworkFirst, fetch_feed.clone()).await?;
    println!("offline read: {} ({:?})", response.value(), response.source());

    let outcome = lifeboat
        .mutate(
            MutationRequest::new(ENDPOINT, r#"{"post":42,"liked":true}"#)
                .dedupe_key("like:42")
                .optimistic(feed.key(), "post 42: hello world (liked)".to_owned()),
        )
        .await?;
    println!("like while offline: {outcome:?}");

    let response = lifeboat.get(&feed, CachePolicy::CacheOnly, fetch_feed).await?;
    println!("optimistic read: {}", response.value());

    println!("-- network back --");
    let mut queue_events = lifeboat.queue().subscribe();
    online.store(true, Ordering::SeqCst);
    connectivity.set(Connectivity::Connected);

    let replayed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = queue_events.recv().await {
            if matches!(event, QueueEvent::Acked { .. }) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    println!("queued like replayed: {replayed}, still pending: {}", lifeboat.queue().len());

    lifeboat.shutdown().await;
    Ok(())
}
