use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::HeaderMap as AxumHeaderMap;
use axum::routing::get;
use axum::Router;
use futures::future::BoxFuture;

use surge_core::{
    Engine, LoadConfig, Method, RandomInterval, Scenario, Settings, StatusCode, VirtualUser,
};
use surge_trace::StepLogReader;

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/hello", get(|| async { "hello without delay" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "finally done"
            }),
        )
        .route(
            "/set-cookie",
            get(|| async { ([(SET_COOKIE, "session=abc123; Path=/")], "cookie set") }),
        )
        .route(
            "/echo-cookies",
            get(|headers: AxumHeaderMap| async move {
                headers
                    .get(COOKIE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|e| panic!("bind: {e}"));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|e| panic!("local_addr: {e}"));
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            panic!("test server failed: {err}");
        }
    });
    format!("http://{addr}")
}

fn load(users: u64, plateau: Duration) -> LoadConfig {
    LoadConfig {
        looping_users: users,
        loop_delay: RandomInterval {
            min: Duration::from_millis(20),
            max: Duration::from_millis(40),
        },
        ramp_up: Duration::from_millis(100),
        plateau,
        ramp_down: Duration::from_millis(100),
        ..LoadConfig::default()
    }
}

fn read_entries(path: &std::path::Path) -> (String, Vec<surge_trace::StepEntry>) {
    let mut reader = StepLogReader::open(path).unwrap_or_else(|e| panic!("open step log: {e}"));
    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .unwrap_or_else(|e| panic!("read entry: {e}"))
    {
        entries.push(entry);
    }
    (reader.step_name.clone(), entries)
}

static HELLO_BASE: OnceLock<String> = OnceLock::new();

fn hello_runner(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let base = HELLO_BASE.get().cloned().unwrap_or_default();
        let _ = user
            .step("fetch hello")
            .expect_success_percentage_at_least(100.0)
            .request(Method::GET, &format!("{base}/hello"))
            .send_with_timeout(Duration::from_secs(5))
            .await
            .assert_status_code(StatusCode::OK)
            .assert_body_contains("hello")
            .archive_stats();
    })
}

#[tokio::test]
async fn run_produces_a_consistent_trace() {
    let base = spawn_server().await;
    let _ = HELLO_BASE.set(base);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    let mut engine = Engine::new(Settings::default());
    engine
        .add_scenario(
            Scenario::new("hello run", hello_runner)
                .with_description("single-step loop against the test server")
                .with_load(load(3, Duration::from_millis(800))),
        )
        .unwrap_or_else(|e| panic!("add scenario: {e}"));

    engine
        .run(Some(dir.path()))
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    let scenario = engine
        .scenario("hello run")
        .unwrap_or_else(|| panic!("scenario missing"));
    let executed = scenario.execution_count();
    assert!(executed > 0, "no loops executed");

    // The scenario index carries the environment and the final counts.
    let index = surge_trace::read_scenario_index(&dir.path().join("scenarios.surge"))
        .unwrap_or_else(|e| panic!("index: {e}"));
    assert!(!index.environment.hostname.is_empty());
    let record = index
        .scenarios
        .get("hello run")
        .unwrap_or_else(|| panic!("scenario record missing"));
    assert_eq!(record.execution_count, executed);
    assert_eq!(record.load.looping_users, 3);

    // One archive per loop, every observation successful, landmarks ordered.
    let (step_name, entries) = read_entries(&dir.path().join("step-1.surge"));
    assert_eq!(step_name, "fetch hello");
    assert_eq!(entries.len() as u64, executed);
    for entry in &entries {
        assert_eq!(entry.status_code, Some(200));
        let failure_kinds =
            u8::from(entry.timeout) + u8::from(entry.error) + u8::from(entry.assertion_failed);
        assert_eq!(failure_kinds, 0, "unexpected failure: {entry:?}");
        let total = entry
            .timestamps
            .total_duration()
            .unwrap_or_else(|| panic!("missing total duration"));
        let ttfb = entry
            .timestamps
            .time_to_first_byte(false)
            .unwrap_or_else(|| panic!("missing ttfb"));
        assert!(ttfb <= total, "ttfb {ttfb:?} exceeds total {total:?}");
        assert!(entry.request_size > 0);
        assert!(entry.response_size > 0);
    }
}

static SLOW_BASE: OnceLock<String> = OnceLock::new();

fn slow_runner(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let base = SLOW_BASE.get().cloned().unwrap_or_default();
        let _ = user
            .step("fetch slowly")
            .request(Method::GET, &format!("{base}/slow"))
            .send_with_timeout(Duration::from_millis(100))
            .await
            .assert_status_code(StatusCode::OK)
            .archive_stats();
    })
}

#[tokio::test]
async fn deadline_breaches_are_archived_as_timeouts() {
    let base = spawn_server().await;
    let _ = SLOW_BASE.set(base);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    let mut engine = Engine::new(Settings::default());
    engine
        .add_scenario(
            Scenario::new("slow target", slow_runner).with_load(load(2, Duration::from_millis(600))),
        )
        .unwrap_or_else(|e| panic!("add scenario: {e}"));
    engine
        .run(Some(dir.path()))
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    let (_name, entries) = read_entries(&dir.path().join("step-1.surge"));
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(entry.timeout, "expected a timeout outcome: {entry:?}");
        assert!(!entry.error);
        assert!(!entry.assertion_failed, "assertions must not run after a timeout");
        assert!(!entry.timeout_root_cause.is_empty());
        // The response never arrived, so the first-byte landmark is unset.
        assert!(entry.timestamps.time_to_first_byte(false).is_none());
    }
}

static DATA_MISMATCHES: AtomicU64 = AtomicU64::new(0);

fn data_runner(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if user.current_loop() == 1 {
            user.data
                .insert("self".to_string(), serde_json::json!(user.current_user()));
        } else {
            let stored = user.data.get("self").and_then(|v| v.as_u64());
            if stored != Some(user.current_user()) {
                DATA_MISMATCHES.fetch_add(1, Ordering::Relaxed);
            }
        }
        user.think_time(Duration::from_millis(5)).await;
    })
}

#[tokio::test]
async fn user_data_persists_across_loops_of_the_same_user() {
    let mut engine = Engine::new(Settings::default());
    engine
        .add_scenario(
            Scenario::new("data persistence", data_runner)
                .with_load(load(4, Duration::from_millis(500))),
        )
        .unwrap_or_else(|e| panic!("add scenario: {e}"));
    engine.run(None).await.unwrap_or_else(|e| panic!("run: {e}"));

    let executed = engine
        .scenario("data persistence")
        .unwrap_or_else(|| panic!("scenario missing"))
        .execution_count();
    assert!(executed > 4, "users never looped twice");
    assert_eq!(DATA_MISMATCHES.load(Ordering::Relaxed), 0);
}

static COOKIE_BASE: OnceLock<String> = OnceLock::new();
static COOKIE_MISSES: AtomicU64 = AtomicU64::new(0);
static COOKIE_CHECKS: AtomicU64 = AtomicU64::new(0);

fn cookie_runner(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let base = COOKIE_BASE.get().cloned().unwrap_or_default();
        if user.current_loop() == 1 {
            let _ = user
                .step("collect cookie")
                .request(Method::GET, &format!("{base}/set-cookie"))
                .send_with_timeout(Duration::from_secs(5))
                .await
                .assert_status_code(StatusCode::OK);
        } else {
            let response = user
                .step("replay cookie")
                .request(Method::GET, &format!("{base}/echo-cookies"))
                .send_with_timeout(Duration::from_secs(5))
                .await;
            COOKIE_CHECKS.fetch_add(1, Ordering::Relaxed);
            if !response.body_text().contains("session=abc123") {
                COOKIE_MISSES.fetch_add(1, Ordering::Relaxed);
            }
        }
    })
}

#[tokio::test]
async fn cookies_accumulate_across_loops_when_the_jar_is_kept() {
    let base = spawn_server().await;
    let _ = COOKIE_BASE.set(base);

    let mut engine = Engine::new(Settings::default());
    let mut config = load(2, Duration::from_millis(600));
    config.clear_cookie_jar_on_every_loop = false;
    engine
        .add_scenario(Scenario::new("sticky cookies", cookie_runner).with_load(config))
        .unwrap_or_else(|e| panic!("add scenario: {e}"));
    engine.run(None).await.unwrap_or_else(|e| panic!("run: {e}"));

    assert!(
        COOKIE_CHECKS.load(Ordering::Relaxed) > 0,
        "users never reached a second loop"
    );
    assert_eq!(COOKIE_MISSES.load(Ordering::Relaxed), 0);
}
