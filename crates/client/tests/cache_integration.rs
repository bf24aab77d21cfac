//! Integration tests for the query cache: dedup under a slow network, TTL
//! behavior over the real HTTP client, and watch interval teardown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use carelink_client::cache::{CacheConfig, QueryCache};
use carelink_client::http::{ApiResponse, HttpClientConfig, ResilientHttpClient, TransportError};
use carelink_client::teardown::TeardownHook;
use carelink_common::resilience::{MockClock, RetryConfig};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn envelope(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "message": null,
        "data": data,
        "timestamp": "2026-08-29T10:00:00Z",
        "correlationId": Uuid::new_v4(),
    })
}

fn http_client(base_url: String) -> Arc<ResilientHttpClient> {
    let config = HttpClientConfig::builder()
        .base_url(base_url)
        .retry(RetryConfig::builder().max_attempts(1).build().unwrap())
        .build()
        .unwrap();
    Arc::new(ResilientHttpClient::new(config).unwrap())
}

fn drug_loader(
    client: Arc<ResilientHttpClient>,
) -> impl Fn() -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<serde_json::Value, TransportError>> + Send>,
> + Send
       + Sync
       + 'static {
    move || {
        let client = Arc::clone(&client);
        Box::pin(async move {
            let response: ApiResponse<serde_json::Value> =
                client.get("/api/drugs/aspirin", None).await?;
            Ok(response.data)
        })
    }
}

#[tokio::test]
async fn three_fetches_during_a_slow_load_produce_one_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/drugs/aspirin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(serde_json::json!({"name": "aspirin"})))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = http_client(server.uri());
    let cache: QueryCache<serde_json::Value> = QueryCache::new(CacheConfig::default()).unwrap();

    // Three callers within 50ms while the network is delayed 500ms.
    let f1 = cache.fetch("drugs:aspirin", drug_loader(Arc::clone(&client)));
    let f2 = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.fetch("drugs:aspirin", drug_loader(Arc::clone(&client))).await
    };
    let f3 = async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.fetch("drugs:aspirin", drug_loader(Arc::clone(&client))).await
    };

    let (r1, r2, r3) = tokio::join!(f1, f2, f3);
    let (r1, r2, r3) = (r1.unwrap(), r2.unwrap(), r3.unwrap());

    assert_eq!(r1.data["name"], "aspirin");
    assert_eq!(r1.data, r2.data);
    assert_eq!(r2.data, r3.data);
    // MockServer verifies expect(1) on drop.
}

#[tokio::test]
async fn fresh_entry_never_touches_the_network_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/drugs/aspirin"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({"name": "aspirin"}))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = http_client(server.uri());
    let cache: QueryCache<serde_json::Value> = QueryCache::new(CacheConfig::default()).unwrap();

    cache.fetch("drugs:aspirin", drug_loader(Arc::clone(&client))).await.unwrap();
    let cached = cache.fetch("drugs:aspirin", drug_loader(Arc::clone(&client))).await.unwrap();

    assert!(cached.from_cache);
    assert!(!cached.is_stale);
}

#[tokio::test]
async fn expired_entry_triggers_background_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/drugs/aspirin"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({"rev": 1}))),
        )
        .mount(&server)
        .await;

    let clock = MockClock::new();
    let config = CacheConfig::builder().default_ttl(Duration::from_secs(30)).build().unwrap();
    let cache: QueryCache<serde_json::Value, MockClock> =
        QueryCache::with_clock(config, clock.clone()).unwrap();
    let client = http_client(server.uri());

    cache.fetch("drugs:aspirin", drug_loader(Arc::clone(&client))).await.unwrap();
    clock.advance(Duration::from_secs(31));

    let stale = cache.fetch("drugs:aspirin", drug_loader(Arc::clone(&client))).await.unwrap();
    assert!(stale.is_stale);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.stats().background_refreshes >= 1);

    let refreshed = cache.fetch("drugs:aspirin", drug_loader(client)).await.unwrap();
    assert!(!refreshed.is_stale);
}

#[tokio::test]
async fn watch_refreshes_in_background_until_torn_down() {
    let calls = Arc::new(AtomicU32::new(0));
    let loader = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, TransportError>(7)
            })
                as std::pin::Pin<
                    Box<dyn std::future::Future<Output = Result<u32, TransportError>> + Send>,
                >
        }
    };

    let cache: QueryCache<u32> = QueryCache::new(CacheConfig::default()).unwrap();
    cache.fetch("observed", loader.clone()).await.unwrap();
    cache.watch("observed", Duration::from_millis(20), loader);

    tokio::time::sleep(Duration::from_millis(90)).await;
    let refreshed = calls.load(Ordering::SeqCst);
    assert!(refreshed >= 3, "expected several background refreshes, saw {refreshed}");

    cache.teardown();
    // Let any refresh already in flight settle, then verify no new ticks.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let settled = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), settled);
}
