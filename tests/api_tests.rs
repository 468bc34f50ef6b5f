use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use kidguard::api::{router, ApiState};
use kidguard::classifier::BlockReason;
use kidguard::clock::Clock;
use kidguard::config::LoggingConfig;
use kidguard::foreground::{ActionFeed, FocusEvent, FocusKind, SnapshotScreen};
use kidguard::logger::BlockNotifier;
use kidguard::policy::{PolicyHandle, THIRTY_MINUTES_MS};
use kidguard::stats::StatsCollector;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

const NOW: i64 = 1_700_000_000_000;

struct FixedClock;

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        NOW
    }
}

struct TestApp {
    app: Router,
    state: Arc<ApiState>,
}

fn app_with(focus_sender: Option<mpsc::Sender<FocusEvent>>) -> TestApp {
    let state = Arc::new(ApiState {
        policy: Arc::new(PolicyHandle::in_memory()),
        stats: StatsCollector::new(),
        notifier: BlockNotifier::new(&LoggingConfig::default()),
        sinkhole: None,
        focus_sender,
        screen: Arc::new(SnapshotScreen::new()),
        actions: Arc::new(ActionFeed::new(10)),
        clock: Arc::new(FixedClock),
        controlling_package: "com.kidguard".to_string(),
        routes: vec!["8.8.8.8".to_string()],
    });
    TestApp {
        app: router(state.clone()),
        state,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_status_reports_defaults() {
    let t = app_with(None);
    let (status, body) = call(&t.app, Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sinkhole"], "disabled");
    assert_eq!(body["upstream_dns"], "8.8.8.8");
    assert_eq!(body["dns_blacklist_size"], 20);
    assert_eq!(body["policy"]["anti_tampering_enabled"], true);
    assert_eq!(body["policy"]["blocking_enabled"], false);
    assert_eq!(body["routes"][0], "8.8.8.8");
}

#[tokio::test]
async fn test_partial_flag_update() {
    let t = app_with(None);
    let (status, body) = call(
        &t.app,
        Method::POST,
        "/api/flags",
        Some(json!({ "blocking_enabled": true, "rest_mode_active": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocking_enabled"], true);
    assert_eq!(body["rest_mode_active"], true);
    assert_eq!(body["anti_tampering_enabled"], true);
    assert!(t.state.policy.rest_mode_active());
}

#[tokio::test]
async fn test_list_pushes_normalize() {
    let t = app_with(None);
    let (status, body) = call(
        &t.app,
        Method::PUT,
        "/api/blocked-domains",
        Some(json!(["  Example.COM ", "", "bad.site"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(
        t.state.policy.snapshot().blocked_domains,
        vec!["bad.site".to_string(), "example.com".to_string()]
    );

    let (_, body) = call(&t.app, Method::PUT, "/api/dns/blacklist", Some(json!([]))).await;
    assert_eq!(body["count"], 4);

    let (_, body) = call(
        &t.app,
        Method::POST,
        "/api/dns/blacklist/add",
        Some(json!({ "domain": "Casino.example" })),
    )
    .await;
    assert_eq!(body["count"], 5);

    let (_, body) = call(
        &t.app,
        Method::POST,
        "/api/dns/blacklist/remove",
        Some(json!({ "domain": "bet365.com" })),
    )
    .await;
    assert_eq!(body["count"], 4);
}

#[tokio::test]
async fn test_blank_upstream_rejected() {
    let t = app_with(None);
    let (status, _) = call(
        &t.app,
        Method::PUT,
        "/api/dns/upstream",
        Some(json!({ "upstream": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(t.state.policy.upstream_dns(), "8.8.8.8");

    let (status, body) = call(
        &t.app,
        Method::PUT,
        "/api/dns/upstream",
        Some(json!({ "upstream": "1.1.1.1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upstream_dns"], "1.1.1.1");
}

#[tokio::test]
async fn test_unlock_endpoints() {
    let t = app_with(None);

    let (status, body) = call(
        &t.app,
        Method::POST,
        "/api/unlocks",
        Some(json!({ "pkg": "com.game.x", "exp": NOW + 60_000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["pkg"], "com.game.x");

    let (status, _) = call(
        &t.app,
        Method::POST,
        "/api/unlocks",
        Some(json!({ "pkg": "", "exp": NOW + 60_000 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing in the foreground yet
    let (status, _) = call(&t.app, Method::POST, "/api/unlocks/thirty-minutes", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    t.state.policy.record_foreground("com.kidguard");
    let (status, _) = call(&t.app, Method::POST, "/api/unlocks/thirty-minutes", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    t.state.policy.record_foreground("com.video.y");
    let (status, body) = call(&t.app, Method::POST, "/api/unlocks/thirty-minutes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pkg"], "com.video.y");
    assert_eq!(body["exp"], NOW + THIRTY_MINUTES_MS);
    assert!(t.state.policy.has_active_unlock("com.video.y", NOW));
}

#[tokio::test]
async fn test_focus_is_queued() {
    let (tx, mut rx) = mpsc::channel(4);
    let t = app_with(Some(tx));

    let (status, _) = call(
        &t.app,
        Method::POST,
        "/api/focus",
        Some(json!({ "package": "com.android.chrome", "kind": "content_changed" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.package, "com.android.chrome");
    assert_eq!(event.kind, FocusKind::ContentChanged);
    assert_eq!(event.at_ms, NOW);
}

#[tokio::test]
async fn test_focus_rejects_foreign_time_base() {
    let (tx, mut rx) = mpsc::channel(4);
    let t = app_with(Some(tx));

    for at_ms in [json!(50_000), json!(i64::MIN), json!(i64::MAX)] {
        let (status, _) = call(
            &t.app,
            Method::POST,
            "/api/focus",
            Some(json!({ "package": "com.android.chrome", "at_ms": at_ms })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert!(rx.try_recv().is_err());

    let (status, _) = call(
        &t.app,
        Method::POST,
        "/api/focus",
        Some(json!({ "package": "com.android.chrome", "at_ms": NOW - 5_000 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(rx.recv().await.unwrap().at_ms, NOW - 5_000);
}

#[tokio::test]
async fn test_focus_without_engine() {
    let t = app_with(None);
    let (status, _) = call(
        &t.app,
        Method::POST,
        "/api/focus",
        Some(json!({ "package": "com.android.chrome" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_screen_push_and_clear() {
    use kidguard::foreground::ScreenSource;

    let t = app_with(None);
    let (status, _) = call(
        &t.app,
        Method::PUT,
        "/api/screen",
        Some(json!({ "children": [{ "text": "https://example.com", "view_id": "com.android.chrome:id/url_bar" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let root = t.state.screen.root().unwrap().unwrap();
    assert_eq!(root.children().len(), 1);

    let (status, _) = call(&t.app, Method::DELETE, "/api/screen", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(t.state.screen.root().unwrap().is_none());
}

#[tokio::test]
async fn test_blocked_feed_newest_first() {
    let t = app_with(None);
    t.state.notifier.notify("bet365.com", BlockReason::Blacklist);
    t.state.notifier.notify("betano.com", BlockReason::Blacklist);

    let (status, body) = call(&t.app, Method::GET, "/api/blocked", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["domain"], "betano.com");
    assert_eq!(body[1]["domain"], "bet365.com");
    assert!(body[0].get("reason").is_none());
}

#[tokio::test]
async fn test_classify_endpoint() {
    let t = app_with(None);
    let (status, body) = call(&t.app, Method::GET, "/api/classify?domain=WWW.Bet365.com.", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["domain"], "www.bet365.com");
    assert_eq!(body["dns"]["verdict"], "block");

    let (_, body) = call(&t.app, Method::GET, "/api/classify?domain=docs.rs", None).await;
    assert_eq!(body["dns"]["verdict"], "allow");
    assert_eq!(body["url"]["verdict"], "allow");
}

#[tokio::test]
async fn test_actions_feed() {
    use kidguard::foreground::HostActions;

    let t = app_with(None);
    t.state.actions.go_home().unwrap();
    let (status, body) = call(&t.app, Method::GET, "/api/actions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["action"], "go_home");
}
