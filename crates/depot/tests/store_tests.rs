// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end read-path scenarios against in-memory collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depot::{
    Converter, FetcherError, FetcherResult, FnValidator, FunctionFetcher, InMemorySourceOfTruth,
    ReadRequest, ReadResponse, ResponseOrigin, SourceOfTruth, StoreBuilder, StoreError,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::time::timeout;

async fn next_response<V>(responses: &mut BoxStream<'static, ReadResponse<V>>) -> ReadResponse<V> {
    timeout(Duration::from_secs(5), responses.next())
        .await
        .expect("timed out waiting for a read response")
        .expect("read stream ended unexpectedly")
}

fn origin_value(key: u32) -> String {
    format!("origin-{key}")
}

fn counting_fetcher(invocations: Arc<AtomicUsize>) -> FunctionFetcher<u32, String> {
    FunctionFetcher::from_future(move |key: u32| {
        let invocations = invocations.clone();
        async move {
            invocations.fetch_add(1, Ordering::SeqCst);
            FetcherResult::data(origin_value(key))
        }
    })
}

#[tokio::test]
async fn test_cached_hit_emits_cache_then_source_of_truth() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = StoreBuilder::identity(
        counting_fetcher(invocations.clone()),
        InMemorySourceOfTruth::new(),
    )
    .build();

    // Warm the cache and the source of truth through one fetch.
    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let mut responses = store.stream(ReadRequest::cached(1, false));
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::Cache,
        }
    );
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::SourceOfTruth,
        }
    );
    // The cached value satisfied the read; no new origin call.
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_miss_then_fetch_emits_loading_then_fetched_data() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = StoreBuilder::identity(
        counting_fetcher(invocations.clone()),
        InMemorySourceOfTruth::new(),
    )
    .build();

    let mut responses = store.stream(ReadRequest::cached(1, true));
    assert_eq!(next_response(&mut responses).await, ReadResponse::Loading);
    // No NoNewData in between: the next record is the fetched value, echoed
    // once the source of truth holds it.
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::Fetcher,
        }
    );

    // The value was persisted, not only served.
    let mut local = store.stream(ReadRequest::local_only(1));
    loop {
        match next_response(&mut local).await {
            ReadResponse::Data { value, origin } => {
                assert_eq!(value, origin_value(1));
                assert_eq!(origin, ResponseOrigin::Cache);
                break;
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_fetcher_error_is_non_terminal() {
    let fetcher = FunctionFetcher::from_stream(|key: u32| {
        futures::stream::iter(vec![
            FetcherResult::error(FetcherError::message("boom")),
            FetcherResult::data(format!("retry-{key}")),
        ])
    });
    let store = StoreBuilder::identity(fetcher, InMemorySourceOfTruth::new()).build();

    let mut responses = store.stream(ReadRequest::cached(1, true));
    assert_eq!(next_response(&mut responses).await, ReadResponse::Loading);
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Error(StoreError::Fetcher(FetcherError::message("boom")))
    );
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: "retry-1".to_string(),
            origin: ResponseOrigin::Fetcher,
        }
    );
}

#[tokio::test]
async fn test_concurrent_fresh_reads_share_one_origin_call() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = {
        let invocations = invocations.clone();
        let gate = gate.clone();
        FunctionFetcher::from_future(move |key: u32| {
            let invocations = invocations.clone();
            let gate = gate.clone();
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                gate.acquire().await.expect("gate closed").forget();
                FetcherResult::data(origin_value(key))
            }
        })
    };
    let store = StoreBuilder::identity(fetcher, InMemorySourceOfTruth::new()).build();

    let mut first = store.stream(ReadRequest::fresh(1));
    let mut second = store.stream(ReadRequest::fresh(1));
    assert_eq!(next_response(&mut first).await, ReadResponse::Loading);
    assert_eq!(next_response(&mut second).await, ReadResponse::Loading);

    // Both subscribers are attached before the origin call completes.
    gate.add_permits(1);
    let expected = ReadResponse::Data {
        value: origin_value(1),
        origin: ResponseOrigin::Fetcher,
    };
    assert_eq!(next_response(&mut first).await, expected);
    assert_eq!(next_response(&mut second).await, expected);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fresh_does_not_emit_cached_values() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let fetcher = {
        let invocations = invocations.clone();
        FunctionFetcher::from_future(move |key: u32| {
            let invocations = invocations.clone();
            async move {
                let round = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                FetcherResult::data(format!("origin-{key}-round-{round}"))
            }
        })
    };
    let store = StoreBuilder::identity(fetcher, InMemorySourceOfTruth::new()).build();

    assert_eq!(store.get(&1).await.unwrap(), "origin-1-round-1");

    // The cache holds round 1, but a fresh read must wait for the origin.
    let mut responses = store.stream(ReadRequest::fresh(1));
    assert_eq!(next_response(&mut responses).await, ReadResponse::Loading);
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: "origin-1-round-2".to_string(),
            origin: ResponseOrigin::Fetcher,
        }
    );
}

#[tokio::test]
async fn test_invalid_cached_value_is_not_served() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let accept = Arc::new(AtomicBool::new(true));
    let validator = {
        let accept = accept.clone();
        FnValidator::new(move |_value: &String| accept.load(Ordering::SeqCst))
    };
    let store = StoreBuilder::identity(
        counting_fetcher(invocations.clone()),
        InMemorySourceOfTruth::new(),
    )
    .validator(validator)
    .build();

    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));

    // Everything the store holds is now stale.
    accept.store(false, Ordering::SeqCst);
    let mut responses = store.stream(ReadRequest::cached(1, false));
    // The invalidated value must not surface from the cache or the source
    // of truth; the pipeline falls through to a fetch.
    assert_eq!(next_response(&mut responses).await, ReadResponse::Loading);
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::Fetcher,
        }
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_removes_memory_and_durable_entries() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = StoreBuilder::identity(
        counting_fetcher(invocations.clone()),
        InMemorySourceOfTruth::new(),
    )
    .build();

    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));
    store.clear(&1).await.unwrap();

    // A local read right after clear sees no data at all.
    let mut responses = store.stream(ReadRequest::local_only(1));
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::NoNewData {
            origin: ResponseOrigin::SourceOfTruth,
        }
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_clear_is_observed_by_active_subscribers() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = StoreBuilder::identity(
        counting_fetcher(invocations.clone()),
        InMemorySourceOfTruth::new(),
    )
    .build();
    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));

    let mut responses = store.stream(ReadRequest::local_only(1));
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::Cache,
        }
    );
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::SourceOfTruth,
        }
    );

    store.clear(&1).await.unwrap();
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::NoNewData {
            origin: ResponseOrigin::SourceOfTruth,
        }
    );
}

#[tokio::test]
async fn test_clear_all_wipes_every_key() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let sot = Arc::new(InMemorySourceOfTruth::new());
    let store = StoreBuilder::identity(counting_fetcher(invocations.clone()), sot.clone()).build();

    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));
    assert_eq!(store.get(&2).await.unwrap(), origin_value(2));

    store.clear_all().await.unwrap();

    for key in [1, 2] {
        let mut responses = store.stream(ReadRequest::local_only(key));
        assert_eq!(
            next_response(&mut responses).await,
            ReadResponse::NoNewData {
                origin: ResponseOrigin::SourceOfTruth,
            }
        );
    }
    let mut reader = sot.reader(&1);
    assert_eq!(reader.next().await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn test_skip_disk_serves_origin_directly_and_persists() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let sot = Arc::new(InMemorySourceOfTruth::new());
    let store = StoreBuilder::identity(counting_fetcher(invocations.clone()), sot.clone()).build();

    let mut responses = store.stream(ReadRequest::skip_disk(1));
    assert_eq!(next_response(&mut responses).await, ReadResponse::Loading);
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::Fetcher,
        }
    );

    // The fetched value still landed in the source of truth.
    let mut reader = sot.reader(&1);
    assert_eq!(
        reader.next().await.unwrap().unwrap(),
        Some(origin_value(1))
    );
}

#[tokio::test]
async fn test_skip_memory_reads_the_source_of_truth() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = StoreBuilder::identity(
        counting_fetcher(invocations.clone()),
        InMemorySourceOfTruth::new(),
    )
    .build();
    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));

    let mut responses = store.stream(ReadRequest::skip_memory(1, false));
    // Straight to the durable value: no cache record first.
    assert_eq!(
        next_response(&mut responses).await,
        ReadResponse::Data {
            value: origin_value(1),
            origin: ResponseOrigin::SourceOfTruth,
        }
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_and_fresh_helpers() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = StoreBuilder::identity(
        counting_fetcher(invocations.clone()),
        InMemorySourceOfTruth::new(),
    )
    .build();

    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));
    // Served from the cache.
    assert_eq!(store.get(&1).await.unwrap(), origin_value(1));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // fresh always round-trips to the origin.
    assert_eq!(store.fresh(&1).await.unwrap(), origin_value(1));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

/// Network and domain shapes differ: the origin speaks raw integers, the
/// source of truth stores decimal strings, consumers observe integers.
struct DecimalConverter;

impl Converter<u64, String, u64> for DecimalConverter {
    fn from_network(&self, network: u64) -> Result<String, StoreError> {
        Ok(network.to_string())
    }

    fn from_domain(&self, value: u64) -> Result<String, StoreError> {
        Ok(value.to_string())
    }

    fn to_domain(&self, local: String) -> Result<u64, StoreError> {
        local
            .parse()
            .map_err(|_| StoreError::conversion(format!("not a decimal value: {local}")))
    }
}

#[tokio::test]
async fn test_conversion_round_trip_through_the_pipeline() {
    let fetcher =
        FunctionFetcher::from_future(|key: u32| async move { FetcherResult::data(key as u64 * 10) });
    let sot = Arc::new(InMemorySourceOfTruth::<u32, String>::new());
    let store = StoreBuilder::new(fetcher, sot.clone(), DecimalConverter).build();

    assert_eq!(store.get(&4).await.unwrap(), 40);

    // Stored in the local shape.
    let mut reader = sot.reader(&4);
    assert_eq!(reader.next().await.unwrap().unwrap(), Some("40".to_string()));
}

/// Keys carrying the operation they describe: the engine treats them as
/// opaque, only the collaborators inspect the variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ArticleKey {
    ById(u32),
    Newest,
}

#[tokio::test]
async fn test_operation_typed_keys_are_opaque_to_the_engine() {
    let fetcher = FunctionFetcher::from_future(|key: ArticleKey| async move {
        match key {
            ArticleKey::ById(id) => FetcherResult::data(format!("article-{id}")),
            ArticleKey::Newest => FetcherResult::data("article-latest".to_string()),
        }
    });
    let store = StoreBuilder::identity(fetcher, InMemorySourceOfTruth::new()).build();

    assert_eq!(
        store.get(&ArticleKey::ById(9)).await.unwrap(),
        "article-9"
    );
    assert_eq!(
        store.get(&ArticleKey::Newest).await.unwrap(),
        "article-latest"
    );
    // Distinct variants are distinct cache entries.
    assert_eq!(
        store.get(&ArticleKey::ById(9)).await.unwrap(),
        "article-9"
    );
}

#[tokio::test]
async fn test_conversion_failure_surfaces_as_an_error_record() {
    let fetcher =
        FunctionFetcher::from_future(|key: u32| async move { FetcherResult::data(key as u64) });
    let sot = Arc::new(InMemorySourceOfTruth::<u32, String>::new());
    sot.write(&1, "not-a-number".to_string()).await.unwrap();
    let store = StoreBuilder::new(fetcher, sot.clone(), DecimalConverter).build();

    let mut responses = store.stream(ReadRequest::local_only(1));
    assert!(matches!(
        next_response(&mut responses).await,
        ReadResponse::Error(StoreError::Conversion(_))
    ));
}
