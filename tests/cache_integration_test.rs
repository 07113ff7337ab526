use requery::cache::{
    FetchCoordinator, QueryFetch, QueryKey, QueryOptions, QueryStatus, QueryStore, RetryPolicy,
    fetch_fn,
};
use requery::error::Error;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn counting_fetcher(calls: Arc<AtomicUsize>, value: Value) -> Arc<dyn QueryFetch> {
    fetch_fn(move || {
        let calls = calls.clone();
        let value = value.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    })
}

fn slow_counting_fetcher(
    calls: Arc<AtomicUsize>,
    value: Value,
    delay: Duration,
) -> Arc<dyn QueryFetch> {
    fetch_fn(move || {
        let calls = calls.clone();
        let value = value.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok(value)
        }
    })
}

fn failing_fetcher(calls: Arc<AtomicUsize>, error: Error) -> Arc<dyn QueryFetch> {
    fetch_fn(move || {
        let calls = calls.clone();
        let error = error.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(error)
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waiters_share_one_network_call() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("posts").push(1i64);
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            slow_counting_fetcher(calls.clone(), json!(["a", "b"]), Duration::from_millis(100)),
            QueryOptions::default(),
        )
        .await;

    // Collect so every task is spawned before the first one is awaited.
    let fetches: Vec<_> = (0..5)
        .map(|_| {
            let coordinator = coordinator.clone();
            let key = key.clone();
            tokio::spawn(async move { coordinator.fetch(&key).await })
        })
        .collect();

    for task in fetches {
        let data = task.await.unwrap().unwrap();
        assert_eq!(data, json!(["a", "b"]));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_five_subscribers_one_network_call() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("posts").push(1i64);
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            slow_counting_fetcher(calls.clone(), json!([]), Duration::from_millis(100)),
            QueryOptions::default().stale_for(Duration::from_secs(300)),
        )
        .await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(coordinator.watch(&key, Arc::new(|_| {})).await.unwrap());
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    for handle in handles {
        coordinator.unwatch(handle).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_while_revalidate_timing() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("posts").push(1i64);
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            counting_fetcher(calls.clone(), json!(["cached"])),
            QueryOptions::default().stale_for(Duration::from_secs(300)),
        )
        .await;

    coordinator.fetch(&key).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t = 4min: fresh, served from cache, no network call.
    tokio::time::advance(Duration::from_secs(240)).await;
    let snapshot = coordinator.access(&key).await.unwrap();
    assert_eq!(snapshot.data, Some(json!(["cached"])));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t = 6min: stale. Cached data comes back immediately and exactly one
    // background fetch fires.
    tokio::time::advance(Duration::from_secs(120)).await;
    let snapshot = coordinator.access(&key).await.unwrap();
    assert_eq!(snapshot.data, Some(json!(["cached"])));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_then_error() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("flaky");
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            failing_fetcher(calls.clone(), Error::Network("connection reset".to_string())),
            QueryOptions::default().with_retry(RetryPolicy::retries(2)),
        )
        .await;

    let result = coordinator.fetch(&key).await;
    assert_eq!(result, Err(Error::Network("connection reset".to_string())));

    // Initial attempt plus exactly two retries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let snapshot = coordinator.store().get(&key).await.unwrap();
    assert_eq!(snapshot.status, QueryStatus::Error);
    assert!(snapshot.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_fails_fast() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("missing");
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            failing_fetcher(
                calls.clone(),
                Error::Http {
                    status: 404,
                    message: "Not Found".to_string(),
                },
            ),
            QueryOptions::default(),
        )
        .await;

    let result = coordinator.fetch(&key).await;
    assert!(matches!(result, Err(Error::Http { status: 404, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retention_resubscribe_and_cold_fetch() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("posts").push(1i64);
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            counting_fetcher(calls.clone(), json!(["page"])),
            QueryOptions::default()
                .stale_for(Duration::from_secs(3600))
                .retain_for(Duration::from_secs(10)),
        )
        .await;

    let handle = coordinator.watch(&key, Arc::new(|_| {})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Last observer leaves; retention countdown starts.
    coordinator.unwatch(handle).await;

    // Re-subscribing before it elapses reuses the entry, no network call.
    tokio::time::advance(Duration::from_secs(5)).await;
    let handle = coordinator.watch(&key, Arc::new(|_| {})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    coordinator.unwatch(handle).await;

    // Letting retention elapse removes the entry.
    tokio::time::advance(Duration::from_secs(11)).await;
    let evicted = coordinator.store().evict_expired(Instant::now()).await;
    assert_eq!(evicted, vec![key.canonical()]);
    assert!(coordinator.store().get(&key).await.is_none());

    // The next subscribe is a cold fetch.
    let handle = coordinator.watch(&key, Arc::new(|_| {})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    coordinator.unwatch(handle).await;
}

#[tokio::test(start_paused = true)]
async fn test_result_not_committed_after_eviction() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("slow");
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            slow_counting_fetcher(calls.clone(), json!("late"), Duration::from_secs(5)),
            QueryOptions::default().retain_for(Duration::from_secs(1)),
        )
        .await;

    let waiter = {
        let coordinator = coordinator.clone();
        let key = key.clone();
        tokio::spawn(async move { coordinator.refetch(&key).await })
    };

    // Entry is unobserved; let retention lapse and evict mid-flight.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let evicted = coordinator.store().evict_expired(Instant::now()).await;
    assert_eq!(evicted, vec![key.canonical()]);

    // The waiter still receives the operation's outcome, but the result is
    // not committed to a store entry that no longer exists.
    let result = waiter.await.unwrap();
    assert_eq!(result, Ok(json!("late")));
    assert!(coordinator.store().get(&key).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_fetch_independently() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let page1 = QueryKey::root("posts").push(1i64);
    let page2 = QueryKey::root("posts").push(2i64);
    let calls1 = Arc::new(AtomicUsize::new(0));
    let calls2 = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &page1,
            slow_counting_fetcher(calls1.clone(), json!("one"), Duration::from_secs(10)),
            QueryOptions::default(),
        )
        .await;
    coordinator
        .register(
            &page2,
            counting_fetcher(calls2.clone(), json!("two")),
            QueryOptions::default(),
        )
        .await;

    let slow = {
        let coordinator = coordinator.clone();
        let key = page1.clone();
        tokio::spawn(async move { coordinator.fetch(&key).await })
    };

    // Page 2 resolves while page 1 is still in flight.
    let data = coordinator.fetch(&page2).await.unwrap();
    assert_eq!(data, json!("two"));
    assert_eq!(calls2.load(Ordering::SeqCst), 1);

    let data = slow.await.unwrap().unwrap();
    assert_eq!(data, json!("one"));
    assert_eq!(calls1.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_offline_pauses_and_reconnect_resumes() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("posts").push(1i64);
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            counting_fetcher(calls.clone(), json!(["online again"])),
            QueryOptions::default(),
        )
        .await;

    coordinator.set_online(false).await;

    let waiter = {
        let coordinator = coordinator.clone();
        let key = key.clone();
        tokio::spawn(async move { coordinator.refetch(&key).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = coordinator.store().get(&key).await.unwrap();
    assert_eq!(snapshot.fetch_status, requery::cache::FetchStatus::Paused);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    coordinator.set_online(true).await;
    let result = waiter.await.unwrap();
    assert_eq!(result, Ok(json!(["online again"])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_refetch_respects_focus() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("ticker");
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator
        .register(
            &key,
            counting_fetcher(calls.clone(), json!(1)),
            QueryOptions::default()
                .stale_for(Duration::from_secs(3600))
                .poll_every(Duration::from_secs(30), false),
        )
        .await;

    let handle = coordinator.watch(&key, Arc::new(|_| {})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Three interval ticks while focused: unconditional refetches, even
    // though the entry is nowhere near stale.
    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    // Unfocused and not allowed to poll in the background: ticks are skipped.
    coordinator.set_focused(false).await;
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    coordinator.unwatch(handle).await;

    // Last observer gone: the interval stops entirely.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_observe_status_transitions() {
    let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
    let key = QueryKey::root("posts").push(1i64);

    coordinator
        .register(
            &key,
            fetch_fn(|| async { Ok(json!(["payload"])) }),
            QueryOptions::default().stale_for(Duration::from_secs(300)),
        )
        .await;

    let seen: Arc<std::sync::Mutex<Vec<(QueryStatus, Option<Value>)>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();

    let handle = coordinator
        .watch(
            &key,
            Arc::new(move |snapshot| {
                sink.lock()
                    .unwrap()
                    .push((snapshot.status, snapshot.data.clone()));
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    coordinator.unwatch(handle).await;

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("subscriber saw at least one update");
    assert_eq!(last.0, QueryStatus::Success);
    assert_eq!(last.1, Some(json!(["payload"])));
}
