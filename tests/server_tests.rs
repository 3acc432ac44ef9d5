//! Server lifecycle, waiting and request log checks over real HTTP.

mod common;

use common::{client, get, insecure_client, start_server, start_server_with, tls_config};
use mock_http_server::{
    BlockingHttpServer, HttpServer, MatcherOptions, MockServerConfig, ReadySignal, RequestMatcher,
    Serve, ServerError, ServerOptions, ServerSession, SessionConfig, WaitingSettings,
};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_start_assigns_port() {
    let server = start_server();
    assert!(server.is_running());
    assert_ne!(server.port(), 0);
    assert_eq!(
        server.url_for("foo"),
        format!("http://127.0.0.1:{}/foo", server.port())
    );
}

#[test]
fn test_start_twice_fails() {
    let mut server = start_server();
    assert!(matches!(server.start(), Err(ServerError::AlreadyRunning)));
    server.stop().unwrap();
    assert!(matches!(server.stop(), Err(ServerError::NotRunning)));
}

#[test]
fn test_restart_keeps_handlers() {
    let mut server = start_server();
    server
        .expect_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("OK");
    server.stop().unwrap();
    assert!(!server.is_running());

    server.start().unwrap();
    assert_eq!(get(&server, "/foo").text().unwrap(), "OK");
}

#[test]
fn test_bind_error() {
    let server = start_server();
    let mut other = HttpServer::new("127.0.0.1", server.port());
    assert!(matches!(other.start(), Err(ServerError::Bind { .. })));
    assert!(!other.is_running());
}

#[test]
fn test_invalid_options_rejected_on_start() {
    let mut server = HttpServer::with_options(
        "127.0.0.1",
        0,
        None,
        ServerOptions {
            no_handler_status_code: 42,
            ..ServerOptions::default()
        },
    );
    assert!(matches!(server.start(), Err(ServerError::InvalidOption(_))));
}

#[test]
fn test_no_handler_status_code() {
    let server = start_server_with(ServerOptions {
        no_handler_status_code: 404,
        ..ServerOptions::default()
    });
    assert_eq!(get(&server, "/missing").status(), 404);

    server.set_no_handler_status_code(418).unwrap();
    assert_eq!(get(&server, "/missing").status(), 418);
    assert!(server.set_no_handler_status_code(1000).is_err());
}

#[test]
fn test_threaded_serves_concurrently() {
    let server = start_server_with(ServerOptions {
        threaded: true,
        ..ServerOptions::default()
    });
    server
        .expect_request("/slow", MatcherOptions::new())
        .unwrap()
        .respond_with_data("done")
        .with_post_hook(mock_http_server::Delay::from_millis(300));

    let url = server.url_for("/slow");
    let started = Instant::now();
    let clients: Vec<_> = (0..4)
        .map(|_| {
            let url = url.clone();
            thread::spawn(move || client().get(url).send().unwrap().text().unwrap())
        })
        .collect();
    for c in clients {
        assert_eq!(c.join().unwrap(), "done");
    }
    assert!(started.elapsed() < Duration::from_millis(1100));
    assert_eq!(server.log().len(), 4);
}

#[test]
fn test_threaded_stop_bounded_by_slow_handler() {
    let mut server = start_server_with(ServerOptions {
        threaded: true,
        ..ServerOptions::default()
    });
    server
        .expect_request("/stuck", MatcherOptions::new())
        .unwrap()
        .respond_with_data("late")
        .with_post_hook(mock_http_server::Delay::from_millis(10_000));

    let url = server.url_for("/stuck");
    // The connection is cut on stop, so the outcome is irrelevant.
    let background = thread::spawn(move || {
        let _ = client().get(url).send();
    });
    thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    server.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(7));
    assert!(!server.is_running());
    background.join().unwrap();
}

#[test]
fn test_unbounded_startup_timeout() {
    let server = start_server_with(ServerOptions {
        startup_timeout: Duration::MAX,
        ..ServerOptions::default()
    });
    assert!(server.is_running());
    assert_eq!(get(&server, "/foo").status(), 500);
}

#[test]
fn test_zero_startup_timeout_does_not_wait() {
    let mut server = HttpServer::with_options(
        "127.0.0.1",
        0,
        None,
        ServerOptions {
            startup_timeout: Duration::ZERO,
            ..ServerOptions::default()
        },
    );
    server.set_thread_target(|ready: ReadySignal, serve: Serve| {
        thread::sleep(Duration::from_millis(300));
        ready.set();
        serve.run();
    });

    let started = Instant::now();
    server.start().unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(server.is_running());

    // The bound listener queues the connection until serving begins.
    server
        .expect_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("OK");
    assert_eq!(get(&server, "/foo").text().unwrap(), "OK");
}

#[test]
fn test_truncated_body_not_dispatched() {
    let server = start_server();
    let handler = server
        .expect_request("/upload", MatcherOptions::new().method("POST"))
        .unwrap();
    handler.respond_with_data("stored");

    let mut stream = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    stream
        .write_all(
            b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 100\r\n\r\nshort",
        )
        .unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut raw = Vec::new();
    let _ = stream.read_to_end(&mut raw);

    if !raw.is_empty() {
        assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 400"));
    }
    assert_eq!(handler.call_count(), 0);
    assert!(server.log().is_empty());
    server.check().unwrap();
}

#[test]
fn test_tls_server() {
    let mut server = HttpServer::with_options(
        "127.0.0.1",
        0,
        Some(tls_config()),
        ServerOptions::default(),
    );
    server.start().unwrap();
    assert!(server.is_tls());
    assert!(server.url_for("/secure").starts_with("https://127.0.0.1:"));

    server
        .expect_oneshot_request("/secure", MatcherOptions::new())
        .unwrap()
        .respond_with_data("encrypted");
    let response = insecure_client().get(server.url_for("/secure")).send().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().unwrap(), "encrypted");

    let log = server.log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0.url(), server.url_for("/secure"));
    server.check().unwrap();
    server.stop().unwrap();
}

#[test]
fn test_custom_thread_target_delays_readiness() {
    let mut server = HttpServer::new("127.0.0.1", 0);
    server.set_thread_target(|ready: ReadySignal, serve: Serve| {
        thread::sleep(Duration::from_millis(100));
        ready.set();
        serve.run();
    });

    let started = Instant::now();
    server.start().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));

    server
        .expect_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("OK");
    assert_eq!(get(&server, "/foo").text().unwrap(), "OK");
}

#[test]
fn test_ready_never_set_still_starts() {
    let mut server = HttpServer::with_options(
        "127.0.0.1",
        0,
        None,
        ServerOptions {
            startup_timeout: Duration::from_millis(100),
            ..ServerOptions::default()
        },
    );
    server.set_thread_target(|_ready: ReadySignal, serve: Serve| serve.run());

    server.start().unwrap();
    assert!(server.is_running());
    assert_eq!(get(&server, "/foo").status(), 500);
    server.stop().unwrap();
}

#[test]
fn test_failed_readiness_is_startup_error() {
    let mut server = HttpServer::new("127.0.0.1", 0);
    server.set_thread_target(|ready: ReadySignal, _serve: Serve| {
        ready.fail("certificate missing");
    });

    match server.start() {
        Err(ServerError::Startup(reason)) => assert_eq!(reason, "certificate missing"),
        other => panic!("unexpected start result: {:?}", other),
    }
    assert!(!server.is_running());
}

#[test]
fn test_scoped_server() {
    let mut server = HttpServer::new("127.0.0.1", 0);
    {
        let scoped = server.scoped().unwrap();
        assert!(scoped.started());
        scoped
            .expect_request("/foo", MatcherOptions::new())
            .unwrap()
            .respond_with_data("OK");
        assert_eq!(get(&scoped, "/foo").text().unwrap(), "OK");
    }
    assert!(!server.is_running());

    server.start().unwrap();
    {
        let scoped = server.scoped().unwrap();
        assert!(!scoped.started());
    }
    assert!(server.is_running());
}

#[test]
fn test_baked_server_over_http() {
    let mut server = start_server();
    let url = server.url_for("/resource");
    {
        let baked = server.bake(MatcherOptions::new().method("PUT").header("X-Token", "t"));
        baked
            .expect_request("/resource", MatcherOptions::new())
            .unwrap()
            .respond_with_data("updated");
    }

    let response = client().put(&url).header("X-Token", "t").send().unwrap();
    assert_eq!(response.text().unwrap(), "updated");
    let response = client().put(&url).send().unwrap();
    assert_eq!(response.status(), 500);
}

#[test]
fn test_wait_succeeds_when_handlers_consumed() {
    let server = start_server();
    server
        .expect_oneshot_request("/a", MatcherOptions::new())
        .unwrap()
        .respond_with_data("a");
    server
        .expect_ordered_request("/b", MatcherOptions::new())
        .unwrap()
        .respond_with_data("b");

    let guard = server.wait();
    let url_a = server.url_for("/a");
    let url_b = server.url_for("/b");
    let background = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        client().get(url_b).send().unwrap();
        client().get(url_a).send().unwrap();
    });

    let waiting = guard.complete().unwrap();
    assert!(waiting.result());
    assert!(waiting.elapsed() < Duration::from_secs(5));
    background.join().unwrap();
    server.check().unwrap();
}

#[test]
fn test_wait_stops_on_nohandler() {
    let server = start_server();
    server
        .expect_oneshot_request("/a", MatcherOptions::new())
        .unwrap()
        .respond_with_data("a");

    let guard = server.wait();
    let url = server.url_for("/unexpected");
    let background = thread::spawn(move || client().get(url).send().unwrap().status());

    let err = guard.complete().unwrap_err();
    assert!(err.message().starts_with("No handler found for request"));
    assert_eq!(background.join().unwrap(), 500);
}

#[test]
fn test_wait_timeout_lists_remaining_handlers() {
    let server = start_server();
    server
        .expect_oneshot_request("/never", MatcherOptions::new())
        .unwrap()
        .respond_with_data("x");

    let err = server
        .wait_with(WaitingSettings {
            timeout: Duration::from_millis(100),
            ..WaitingSettings::default()
        })
        .complete()
        .unwrap_err();
    assert!(err
        .message()
        .starts_with("Wait timeout occurred, but some handlers left:"));
    assert!(err.message().contains("/never"));

    let waiting = server
        .wait_with(WaitingSettings {
            timeout: Duration::from_millis(50),
            raise_assertions: false,
            ..WaitingSettings::default()
        })
        .complete()
        .unwrap();
    assert!(!waiting.result());
}

#[test]
fn test_request_log_queries() {
    let server = start_server();
    server
        .expect_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("OK");

    get(&server, "/foo?x=1");
    get(&server, "/foo?x=2");
    get(&server, "/bar");
    server.clear_assertions();

    let matcher = RequestMatcher::new("/foo", MatcherOptions::new()).unwrap();
    assert_eq!(server.get_matching_requests_count(&matcher), 2);
    server.assert_request_made(&matcher, 2).unwrap();

    let by_query = RequestMatcher::new("/foo", MatcherOptions::new().query_string("x=2")).unwrap();
    let matched = server.iter_matching_requests(&by_query);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].1.status(), 200);

    let posted = RequestMatcher::new("/foo", MatcherOptions::new().method("POST")).unwrap();
    let err = server.assert_request_made(&posted, 1).unwrap_err();
    assert!(err
        .message()
        .starts_with("Matching request found 0 times but expected 1 times."));
    assert!(err.message().contains("Found 2 similar request(s):"));

    server.clear_log();
    assert!(server.log().is_empty());
}

#[test]
fn test_request_remote_addr_and_url() {
    let server = start_server();
    server
        .expect_request("/foo", MatcherOptions::new())
        .unwrap()
        .respond_with_data("OK");
    get(&server, "/foo?a=b");

    let log = server.log();
    let (request, _) = &log[0];
    assert!(request.remote_addr().unwrap().ip().is_loopback());
    assert_eq!(request.url(), server.url_for("/foo?a=b"));
}

#[test]
fn test_blocking_server_over_http() {
    let mut server = BlockingHttpServer::new("127.0.0.1", 0);
    server.start().unwrap();

    let url = server.url_for("/my/path");
    let background = thread::spawn(move || {
        let response = client().post(url).body("ping").send().unwrap();
        (response.status().as_u16(), response.text().unwrap())
    });

    let handler = server
        .assert_request(
            "/my/path",
            MatcherOptions::new().method("POST").data("ping"),
            Duration::from_secs(5),
        )
        .unwrap();
    handler.respond_with_data("pong");

    assert_eq!(background.join().unwrap(), (200, "pong".to_string()));
    server.check().unwrap();
    server.stop().unwrap();
}

#[test]
fn test_config_expectations_served() {
    let yaml = r#"
server:
  no_handler_status_code: 404
expectations:
  - kind: oneshot
    request:
      uri:
        type: exact
        value: /login
      method: POST
    response:
      status: 201
      headers:
        X-Session: abc
      body:
        type: json
        content:
          token: abc
  - request:
      uri:
        type: prefix
        value: /static/
    response:
      body:
        type: base64
        content: aGVsbG8=
"#;
    let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
    config.validate().unwrap();

    let mut server = HttpServer::with_options("127.0.0.1", 0, None, config.server.clone());
    config.register(&server).unwrap();
    server.start().unwrap();

    let response = client().post(server.url_for("/login")).send().unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["x-session"], "abc");
    assert_eq!(
        response.json::<serde_json::Value>().unwrap(),
        serde_json::json!({"token": "abc"})
    );
    assert_eq!(client().post(server.url_for("/login")).send().unwrap().status(), 404);

    assert_eq!(get(&server, "/static/app.js").text().unwrap(), "hello");
}

#[test]
fn test_session_server_is_shared() {
    let mut session = ServerSession::new(
        SessionConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        ServerOptions::default(),
    );

    let first_port = {
        let server = session.acquire().unwrap();
        server
            .expect_request("/foo", MatcherOptions::new())
            .unwrap()
            .respond_with_data("OK");
        assert_eq!(get(server, "/foo").text().unwrap(), "OK");
        server.port()
    };

    let server = session.acquire().unwrap();
    assert_eq!(server.port(), first_port);
    assert!(server.handlers().is_empty());
    assert!(server.log().is_empty());
    assert_eq!(get(server, "/foo").status(), 500);
}
