//! End-to-end dispatcher behavior over plain HTTP/1.1.

mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use support::{response, ScriptedServer};

use mimic::digest::parse_authorization;
use mimic::redirect::{max_redirects, no_redirects};
use mimic::retry::{retry_on_network_error, retry_on_server_error};
use mimic::{Client, ErrorKind, ResultState};

#[tokio::test]
async fn get_round_trip() {
    let server = ScriptedServer::start(vec![response(
        200,
        "OK",
        &[("Content-Type", "text/plain")],
        "hello",
    )])
    .await;

    let client = Client::builder().build();
    let resp = client.get(server.url("/hello")).send().await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.protocol, "HTTP/1.1");
    assert_eq!(resp.text().unwrap(), "hello");
    assert_eq!(resp.result_state, ResultState::Success);

    let seen = server.requests().await;
    assert_eq!(seen.len(), 1);
    assert!(seen[0].request_line().starts_with("GET /hello HTTP/1.1"));
}

#[tokio::test]
async fn common_headers_and_request_headers_merge() {
    let server = ScriptedServer::start(vec![response(200, "OK", &[], "")]).await;
    let client = Client::builder()
        .user_agent("mimic-test/1.0")
        .common_header("accept", "*/*")
        .build();
    client
        .get(server.url("/"))
        .header("x-request", "yes")
        .send()
        .await
        .unwrap();

    let seen = server.requests().await;
    assert_eq!(seen[0].header("user-agent").as_deref(), Some("mimic-test/1.0"));
    assert_eq!(seen[0].header("accept").as_deref(), Some("*/*"));
    assert_eq!(seen[0].header("x-request").as_deref(), Some("yes"));
}

#[tokio::test]
async fn base_url_path_params_and_query() {
    let server = ScriptedServer::start(vec![response(200, "OK", &[], "")]).await;
    let client = Client::builder()
        .base_url(server.url(""))
        .common_query("api_key", "k1")
        .build();
    client
        .get("/users/{id}/posts")
        .path_param("id", "42")
        .query("page", "2")
        .send()
        .await
        .unwrap();

    let seen = server.requests().await;
    let line = seen[0].request_line().to_string();
    assert!(line.contains("/users/42/posts"), "{line}");
    assert!(line.contains("api_key=k1"), "{line}");
    assert!(line.contains("page=2"), "{line}");
}

#[tokio::test]
async fn post_json_body() {
    let server = ScriptedServer::start(vec![response(200, "OK", &[], "")]).await;
    let client = Client::builder().build();
    client
        .post(server.url("/items"))
        .json(&serde_json::json!({"name": "thing"}))
        .send()
        .await
        .unwrap();

    let seen = server.requests().await;
    assert_eq!(seen[0].body, br#"{"name":"thing"}"#);
    assert!(seen[0]
        .header("content-type")
        .unwrap()
        .starts_with("application/json"));
}

#[tokio::test]
async fn redirects_are_followed_and_capped() {
    let server = ScriptedServer::start(vec![
        response(302, "Found", &[("Location", "/next")], ""),
        response(200, "OK", &[], "arrived"),
    ])
    .await;
    let client = Client::builder().build();
    let resp = client.get(server.url("/start")).send().await.unwrap();
    assert_eq!(resp.status, 200);
    assert!(resp.url.ends_with("/next"));
    assert_eq!(resp.text().unwrap(), "arrived");

    // Policy error surfaces to the caller.
    let server = ScriptedServer::start(vec![response(
        302,
        "Found",
        &[("Location", "/elsewhere")],
        "",
    )])
    .await;
    let client = Client::builder()
        .redirect_policies(vec![no_redirects()])
        .build();
    let err = client.get(server.url("/")).send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Request);
}

#[tokio::test]
async fn redirect_limit_is_enforced() {
    let server = ScriptedServer::start(vec![
        response(302, "Found", &[("Location", "/a")], ""),
        response(302, "Found", &[("Location", "/b")], ""),
        response(302, "Found", &[("Location", "/c")], ""),
    ])
    .await;
    let client = Client::builder()
        .redirect_policies(vec![max_redirects(2)])
        .build();
    let err = client.get(server.url("/")).send().await.unwrap_err();
    assert!(err.to_string().contains("redirect limit"), "{err}");
}

#[tokio::test]
async fn post_redirect_downgrades_to_get() {
    let server = ScriptedServer::start(vec![
        response(302, "Found", &[("Location", "/after")], ""),
        response(200, "OK", &[], ""),
    ])
    .await;
    let client = Client::builder().build();
    client
        .post(server.url("/submit"))
        .body(&b"payload"[..])
        .send()
        .await
        .unwrap();

    let seen = server.requests().await;
    assert!(seen[0].request_line().starts_with("POST /submit"));
    assert!(seen[1].request_line().starts_with("GET /after"));
    assert!(seen[1].body.is_empty());
}

#[tokio::test]
async fn cookies_flow_through_the_jar() {
    let server = ScriptedServer::start(vec![
        response(200, "OK", &[("Set-Cookie", "session=tok123; Path=/")], ""),
        response(200, "OK", &[], ""),
    ])
    .await;
    let client = Client::builder().build();
    client.get(server.url("/login")).send().await.unwrap();
    client.get(server.url("/area")).send().await.unwrap();

    let seen = server.requests().await;
    assert!(seen[0].header("cookie").is_none());
    assert_eq!(seen[1].header("cookie").as_deref(), Some("session=tok123"));
}

#[tokio::test]
async fn retry_on_server_error_reissues_request() {
    let server = ScriptedServer::start(vec![
        response(503, "Unavailable", &[], ""),
        response(503, "Unavailable", &[], ""),
        response(200, "OK", &[], "finally"),
    ])
    .await;
    let hook_count = Arc::new(AtomicU32::new(0));
    let hook_observer = Arc::clone(&hook_count);
    let client = Client::builder()
        .retry_count(2)
        .retry_fixed_interval(Duration::from_millis(5))
        .add_retry_condition(retry_on_server_error())
        .add_retry_hook(Arc::new(move |_, _| {
            hook_observer.fetch_add(1, Ordering::SeqCst);
        }))
        .build();

    let resp = client.get(server.url("/flaky")).send().await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.attempt, 2);
    // Hooks fire exactly once per retry.
    assert_eq!(hook_count.load(Ordering::SeqCst), 2);
    assert_eq!(server.requests().await.len(), 3);
}

#[tokio::test]
async fn retry_budget_is_never_exceeded() {
    let server = ScriptedServer::start(vec![
        response(500, "Err", &[], ""),
        response(500, "Err", &[], ""),
        response(500, "Err", &[], ""),
        response(500, "Err", &[], ""),
    ])
    .await;
    let client = Client::builder()
        .retry_count(2)
        .retry_fixed_interval(Duration::from_millis(1))
        .add_retry_condition(retry_on_server_error())
        .build();

    let resp = client.get(server.url("/down")).send().await.unwrap();
    assert_eq!(resp.status, 500);
    // 1 initial + 2 retries.
    assert_eq!(server.requests().await.len(), 3);
}

#[tokio::test]
async fn network_failure_retries_with_backoff_and_reports_kind() {
    let started = Instant::now();
    let client = Client::builder()
        .retry_count(2)
        .retry_backoff_interval(Duration::from_millis(100), Duration::from_millis(500))
        .add_retry_condition(retry_on_network_error())
        .build();

    // Reserved TLD: resolution fails on every attempt.
    let err = client
        .get("http://host.invalid/")
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    // Two retry sleeps in [50ms, 500ms] each.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "slept {elapsed:?}");
    assert!(err.to_string().contains("host.invalid"), "{err}");
}

#[tokio::test]
async fn on_error_hook_fires_once_per_terminal_failure() {
    let fired = Arc::new(AtomicU32::new(0));
    let observer = Arc::clone(&fired);
    let client = Client::builder()
        .retry_count(1)
        .retry_fixed_interval(Duration::from_millis(1))
        .add_retry_condition(retry_on_network_error())
        .on_error(Arc::new(move |_, _, _, _| {
            observer.fetch_add(1, Ordering::SeqCst);
        }))
        .build();

    let _ = client.get("http://host.invalid/").send().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn digest_challenge_is_answered() {
    let server = ScriptedServer::start(vec![
        response(
            401,
            "Unauthorized",
            &[(
                "WWW-Authenticate",
                r#"Digest realm="test", nonce="abc", qop="auth", algorithm=MD5"#,
            )],
            "",
        ),
        response(200, "OK", &[], "secret"),
    ])
    .await;
    let client = Client::builder().digest_auth("roc", "123456").build();
    let resp = client.get(server.url("/protected")).send().await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text().unwrap(), "secret");

    let seen = server.requests().await;
    assert_eq!(seen.len(), 2);
    assert!(seen[0].header("authorization").is_none());
    let auth = seen[1].header("authorization").unwrap();
    assert!(auth.starts_with("Digest "), "{auth}");
    let fields = parse_authorization(&auth);
    assert_eq!(fields["username"], "roc");
    assert_eq!(fields["realm"], "test");
    assert_eq!(fields["nc"], "00000001");
    assert_eq!(fields["uri"], "/protected");
    assert_eq!(fields["cnonce"].len(), 32);
}

#[tokio::test]
async fn server_error_state_is_reported() {
    let server = ScriptedServer::start(vec![response(
        404,
        "Not Found",
        &[],
        r#"{"error":"missing"}"#,
    )])
    .await;
    let client = Client::builder().build();
    let resp = client.get(server.url("/missing")).send().await.unwrap();
    assert_eq!(resp.result_state, ResultState::Error);
    #[derive(serde::Deserialize)]
    struct ErrBody {
        error: String,
    }
    let body: ErrBody = resp.json().unwrap();
    assert_eq!(body.error, "missing");
}

#[tokio::test]
async fn get_payload_gating() {
    let server = ScriptedServer::start(vec![response(200, "OK", &[], "")]).await;
    let client = Client::builder().allow_get_method_payload(false).build();
    let err = client
        .get(server.url("/"))
        .body(&b"body"[..])
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Request);

    let allowing = Client::builder().build();
    allowing
        .get(server.url("/"))
        .body(&b"body"[..])
        .send()
        .await
        .unwrap();
}

#[tokio::test]
async fn h1_connections_are_reused() {
    let server = ScriptedServer::start(vec![
        response(200, "OK", &[], "one"),
        response(200, "OK", &[], "two"),
    ])
    .await;
    let client = Client::builder().build();
    client.get(server.url("/1")).send().await.unwrap();
    client.get(server.url("/2")).send().await.unwrap();
    // Both requests observed; the scripted server would have dropped a
    // second connection (single accept loop per connection handles the
    // keep-alive reuse).
    assert_eq!(server.requests().await.len(), 2);
}
