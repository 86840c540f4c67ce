use std::time::Duration;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::HeaderMap as AxumHeaderMap;
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use http::{HeaderMap, Method};
use url::Url;

use surge_http::{ClientConfig, UserClient};

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/hello", get(|| async { "hello from the test server" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "finally"
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
        )
        .route("/redirect", get(|| async { Redirect::temporary("/hello") }));

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

fn client() -> UserClient {
    UserClient::new(&ClientConfig::default()).unwrap_or_else(|e| panic!("client: {e}"))
}

fn url(base: &str, path: &str) -> Url {
    Url::parse(&format!("{base}{path}")).unwrap_or_else(|e| panic!("url: {e}"))
}

async fn get_once(client: &UserClient, target: Url, timeout: Option<Duration>) -> surge_http::SendOutcome {
    let prepared = client.prepare(Method::GET, target, HeaderMap::new(), Bytes::new(), timeout);
    client.send(prepared).await
}

#[tokio::test]
async fn successful_get_stamps_all_landmarks_in_order() {
    let base = spawn_server().await;
    let outcome = get_once(&client(), url(&base, "/hello"), None).await;

    assert!(outcome.failure.is_none(), "unexpected failure: {:?}", outcome.failure);
    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.status_line, "200 OK");
    assert_eq!(outcome.body.as_ref(), b"hello from the test server");
    assert!(outcome.request_size > 0);
    assert!(outcome.response_size as usize > outcome.body.len());

    let ts = outcome.timestamps;
    let start = ts.start.unwrap_or_else(|| panic!("start unset"));
    let wrote = ts.wrote_request.unwrap_or_else(|| panic!("wrote_request unset"));
    let first = ts
        .got_first_response_byte
        .unwrap_or_else(|| panic!("got_first_response_byte unset"));
    let done = ts.done.unwrap_or_else(|| panic!("done unset"));
    assert!(start <= wrote, "start must precede wrote_request");
    assert!(wrote <= first, "wrote_request must precede first byte");
    assert!(first <= done, "first byte must precede done");
}

#[tokio::test]
async fn deadline_breach_is_classified_as_timeout() {
    let base = spawn_server().await;
    let outcome = get_once(
        &client(),
        url(&base, "/slow"),
        Some(Duration::from_millis(100)),
    )
    .await;

    let failure = match outcome.failure {
        Some(f) => f,
        None => panic!("expected a timeout failure"),
    };
    assert!(failure.is_timeout());
    assert!(!failure.root_cause().is_empty());
}

#[tokio::test]
async fn connection_failure_is_classified_as_error() {
    // Reserved documentation address: nothing listens there.
    let target = Url::parse("http://127.0.0.1:9/unreachable")
        .unwrap_or_else(|e| panic!("url: {e}"));
    let outcome = get_once(&client(), target, None).await;

    let failure = match outcome.failure {
        Some(f) => f,
        None => panic!("expected a transport error"),
    };
    assert!(!failure.is_timeout());
    assert!(!failure.root_cause().is_empty());
    assert_eq!(outcome.status, None);
}

#[tokio::test]
async fn cookies_accumulate_and_clear_per_jar() {
    let base = spawn_server().await;
    let client = client();

    let outcome = get_once(&client, url(&base, "/set-cookie"), None).await;
    assert_eq!(outcome.status, Some(200));

    let echoed = get_once(&client, url(&base, "/echo-cookies"), None).await;
    let body = String::from_utf8_lossy(&echoed.body).to_string();
    assert!(body.contains("session=abc123"), "jar cookie missing: {body:?}");

    client.clear_cookie_jar();
    let echoed = get_once(&client, url(&base, "/echo-cookies"), None).await;
    assert!(echoed.body.is_empty(), "cleared jar still sent cookies");
}

#[tokio::test]
async fn redirects_are_followed_and_the_final_url_recorded() {
    let base = spawn_server().await;
    let outcome = get_once(&client(), url(&base, "/redirect"), None).await;

    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.body.as_ref(), b"hello from the test server");
    let final_url = match outcome.final_url {
        Some(u) => u,
        None => panic!("final url missing"),
    };
    assert!(final_url.path().ends_with("/hello"));
}
