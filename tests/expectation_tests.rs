//! Expectations served over real HTTP connections.

mod common;

use common::{client, get, start_server};
use mock_http_server::{
    Garbage, MatcherOptions, Request, Response, ResponseOptions, UriPattern, NO_HANDLER_BODY,
    PERMANENT_FAILURE_MESSAGE,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[test]
fn test_permanent_request() {
    let server = start_server();
    server
        .expect_request("/foobar", MatcherOptions::new())
        .unwrap()
        .respond_with_data("OK");

    for _ in 0..3 {
        let response = get(&server, "/foobar");
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().unwrap(), "OK");
    }
    server.check().unwrap();
}

#[test]
fn test_oneshot_request() {
    let server = start_server();
    server
        .expect_oneshot_request("/foobar", MatcherOptions::new())
        .unwrap()
        .respond_with_data("OK");

    assert_eq!(get(&server, "/foobar").text().unwrap(), "OK");

    let response = get(&server, "/foobar");
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().unwrap(), NO_HANDLER_BODY);

    let err = server.check_assertions().unwrap_err();
    assert!(err.message().starts_with("No handler found for request <Request"));
    assert!(err.message().contains("/foobar"));
}

#[test]
fn test_ordered_requests_in_order() {
    let server = start_server();
    server
        .expect_ordered_request("/first", MatcherOptions::new())
        .unwrap()
        .respond_with_data("1");
    server
        .expect_ordered_request("/second", MatcherOptions::new())
        .unwrap()
        .respond_with_data("2");

    assert_eq!(get(&server, "/first").text().unwrap(), "1");
    assert_eq!(get(&server, "/second").text().unwrap(), "2");
    assert!(server.ordered_handlers().is_empty());
    server.check().unwrap();
}

#[test]
fn test_ordered_mismatch_fails_permanently() {
    let server = start_server();
    server
        .expect_ordered_request("/first", MatcherOptions::new())
        .unwrap()
        .respond_with_data("1");
    server
        .expect_ordered_request("/second", MatcherOptions::new())
        .unwrap()
        .respond_with_data("2");
    server
        .expect_request("/always", MatcherOptions::new())
        .unwrap()
        .respond_with_data("always");

    assert_eq!(get(&server, "/second").status(), 500);
    assert!(server.is_permanently_failed());

    // Every later request fails, even ones a permanent handler would serve.
    assert_eq!(get(&server, "/first").status(), 500);
    assert_eq!(get(&server, "/always").status(), 500);

    let assertions = server.assertions();
    assert_eq!(assertions.len(), 3);
    assert!(assertions[0].message().starts_with("No handler found for request"));
    assert_eq!(assertions[1].message(), PERMANENT_FAILURE_MESSAGE);
    assert_eq!(assertions[2].message(), PERMANENT_FAILURE_MESSAGE);

    server.clear();
    assert!(!server.is_permanently_failed());
}

#[test]
fn test_handler_priority() {
    let server = start_server();
    server
        .expect_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("permanent");
    server
        .expect_oneshot_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("oneshot");
    server
        .expect_ordered_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("ordered");

    assert_eq!(get(&server, "/foo").text().unwrap(), "ordered");
    assert_eq!(get(&server, "/foo").text().unwrap(), "oneshot");
    assert_eq!(get(&server, "/foo").text().unwrap(), "permanent");
    assert_eq!(get(&server, "/foo").text().unwrap(), "permanent");
    server.check().unwrap();
}

#[test]
fn test_method_matching() {
    let server = start_server();
    server
        .expect_request("/foo", MatcherOptions::new().method("post"))
        .unwrap()
        .respond_with_data("created");

    assert_eq!(get(&server, "/foo").status(), 500);
    let response = client().post(server.url_for("/foo")).send().unwrap();
    assert_eq!(response.text().unwrap(), "created");
}

#[test]
fn test_query_string_matching() {
    let server = start_server();
    server
        .expect_request("/raw", MatcherOptions::new().query_string("a=1&b=2"))
        .unwrap()
        .respond_with_data("raw");
    server
        .expect_request(
            "/mapping",
            MatcherOptions::new().query_string([("a", "1"), ("b", "2")]),
        )
        .unwrap()
        .respond_with_data("mapping");
    server
        .expect_request("/flag", MatcherOptions::new().query_string(true))
        .unwrap()
        .respond_with_data("flag");

    assert_eq!(get(&server, "/raw?a=1&b=2").text().unwrap(), "raw");
    assert_eq!(get(&server, "/raw?b=2&a=1").status(), 500);

    assert_eq!(get(&server, "/mapping?b=2&a=1").text().unwrap(), "mapping");
    assert_eq!(get(&server, "/mapping?a=1").status(), 500);

    assert_eq!(get(&server, "/flag?x").text().unwrap(), "flag");
    assert_eq!(get(&server, "/flag").status(), 500);
}

#[test]
fn test_header_matching() {
    let server = start_server();
    server
        .expect_request("/foo", MatcherOptions::new().header("X-Api-Key", "secret"))
        .unwrap()
        .respond_with_data("OK");

    let response = client()
        .get(server.url_for("/foo"))
        .header("x-api-key", "secret")
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client()
        .get(server.url_for("/foo"))
        .header("x-api-key", "wrong")
        .send()
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[test]
fn test_authorization_header_compared_structurally() {
    let server = start_server();
    server
        .expect_request(
            "/auth",
            MatcherOptions::new().header(
                "Authorization",
                r#"Digest username="Mufasa", realm="testrealm@host.com""#,
            ),
        )
        .unwrap()
        .respond_with_data("OK");

    let response = client()
        .get(server.url_for("/auth"))
        .header(
            "Authorization",
            r#"Digest realm="testrealm@host.com", username="Mufasa""#,
        )
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[test]
fn test_json_matching() {
    let server = start_server();
    server
        .expect_request(
            "/foo",
            MatcherOptions::new()
                .method("POST")
                .json(json!({"name": "widget", "tags": ["a", "b"]})),
        )
        .unwrap()
        .respond_with_json(json!({"id": 1}));

    // key order and whitespace do not matter
    let response = client()
        .post(server.url_for("/foo"))
        .body(r#"{ "tags": ["a", "b"], "name": "widget" }"#)
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({"id": 1}));

    let response = client()
        .post(server.url_for("/foo"))
        .body("not json")
        .send()
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[test]
fn test_data_matching() {
    let server = start_server();
    server
        .expect_request("/upload", MatcherOptions::new().data(&b"\x00\x01payload"[..]))
        .unwrap()
        .respond_with_data("stored");

    let response = client()
        .put(server.url_for("/upload"))
        .body(b"\x00\x01payload".to_vec())
        .send()
        .unwrap();
    assert_eq!(response.text().unwrap(), "stored");
}

#[test]
fn test_uri_patterns() {
    let server = start_server();
    server
        .expect_request(UriPattern::regex(r"^/items/\d+$").unwrap(), MatcherOptions::new())
        .unwrap()
        .respond_with_data("item");
    server
        .expect_request(
            UriPattern::predicate("even length", |path| path.len() % 2 == 0),
            MatcherOptions::new(),
        )
        .unwrap()
        .respond_with_data("even");

    assert_eq!(get(&server, "/items/42").text().unwrap(), "item");
    assert_eq!(get(&server, "/ab").text().unwrap(), "even");
    assert_eq!(get(&server, "/abc").status(), 500);
}

#[test]
fn test_percent_encoded_path_is_decoded() {
    let server = start_server();
    server
        .expect_request("/a b", MatcherOptions::new())
        .unwrap()
        .respond_with_data("decoded");

    assert_eq!(get(&server, "/a%20b").text().unwrap(), "decoded");
}

#[test]
fn test_respond_with_response_headers() {
    let server = start_server();
    server
        .expect_request("/teapot", MatcherOptions::new())
        .unwrap()
        .respond_with_data_opts(
            "short and stout",
            ResponseOptions::new()
                .status(418)
                .header("X-Kind", "teapot")
                .content_type("text/html"),
        );

    let response = get(&server, "/teapot");
    assert_eq!(response.status(), 418);
    assert_eq!(response.headers()["x-kind"], "teapot");
    assert_eq!(response.headers()["content-type"], "text/html");
}

#[test]
fn test_respond_with_handler() {
    let server = start_server();
    server
        .expect_request("/echo", MatcherOptions::new())
        .unwrap()
        .respond_with_handler(|request: &Request| {
            Response::new(request.body().clone()).with_header("X-Method", request.method())
        });

    let response = client()
        .post(server.url_for("/echo"))
        .body("ping")
        .send()
        .unwrap();
    assert_eq!(response.headers()["x-method"], "POST");
    assert_eq!(response.text().unwrap(), "ping");
}

#[test]
fn test_handler_error_is_queued() {
    let server = start_server();
    server
        .expect_request("/fail", MatcherOptions::new())
        .unwrap()
        .respond_with_handler(|_: &Request| -> Result<Response, std::io::Error> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "backend down"))
        });

    assert_eq!(get(&server, "/fail").status(), 500);
    assert_eq!(server.handler_error_count(), 1);
    assert!(server.check_assertions().is_ok());

    let err = server.check_handler_errors().unwrap_err();
    let io_err = err.downcast_ref::<std::io::Error>().unwrap();
    assert_eq!(io_err.to_string(), "backend down");
    assert!(server.check_handler_errors().is_ok());
}

#[test]
fn test_handler_panic_is_reported() {
    let server = start_server();
    server
        .expect_request("/panic", MatcherOptions::new())
        .unwrap()
        .respond_with_handler(|_: &Request| -> Response { panic!("handler exploded") });

    assert_eq!(get(&server, "/panic").status(), 500);
    let err = server.check_assertions().unwrap_err();
    assert!(err.message().contains("handler exploded"));

    // the server keeps serving
    assert_eq!(get(&server, "/panic").status(), 500);
}

#[test]
fn test_handler_without_response() {
    let server = start_server();
    server.expect_request("/foo", MatcherOptions::new()).unwrap();

    assert_eq!(get(&server, "/foo").status(), 500);
    assert!(server.check_handler_errors().is_err());
}

#[test]
fn test_calls_are_recorded() {
    let server = start_server();
    let handler = server
        .expect_request("/foo", MatcherOptions::new())
        .unwrap();
    handler.respond_with_data("OK");

    client()
        .post(server.url_for("/foo"))
        .body(r#"{"n": 1}"#)
        .send()
        .unwrap();
    get(&server, "/foo");

    assert_eq!(handler.call_count(), 2);
    assert_eq!(
        handler.calls_json().unwrap(),
        vec![Some(json!({"n": 1})), None]
    );
}

#[test]
fn test_post_hooks() {
    let server = start_server();
    server
        .expect_request("/garbage", MatcherOptions::new())
        .unwrap()
        .respond_with_data("body")
        .with_post_hook(Garbage::new(3, 5));
    server
        .expect_request("/custom", MatcherOptions::new())
        .unwrap()
        .respond_with_data("body")
        .with_post_hook(|_: &Request, response: Response| response.with_status(202));

    let bytes = get(&server, "/garbage").bytes().unwrap();
    assert_eq!(bytes.len(), 3 + 4 + 5);
    assert_eq!(&bytes[3..7], b"body");

    assert_eq!(get(&server, "/custom").status(), 202);
}

#[test]
fn test_delay_hook() {
    let server = start_server();
    server
        .expect_request("/slow", MatcherOptions::new())
        .unwrap()
        .respond_with_data("late")
        .with_post_hook(mock_http_server::Delay::from_millis(200));

    let started = Instant::now();
    assert_eq!(get(&server, "/slow").text().unwrap(), "late");
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[test]
fn test_mapping_query_from_hashmap() {
    let server = start_server();
    let mut expected = HashMap::new();
    expected.insert("user", "alice");
    server
        .expect_request("/profile", MatcherOptions::new().query_string(expected))
        .unwrap()
        .respond_with_data("alice");

    assert_eq!(get(&server, "/profile?user=alice").text().unwrap(), "alice");
    assert_eq!(get(&server, "/profile?user=bob").status(), 500);
}
