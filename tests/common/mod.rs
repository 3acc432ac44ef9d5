#![allow(dead_code)]

use mock_http_server::{HttpServer, ServerOptions};
use std::time::Duration;

/// Start a server on a free loopback port.
pub fn start_server() -> HttpServer {
    start_server_with(ServerOptions::default())
}

pub fn start_server_with(options: ServerOptions) -> HttpServer {
    let mut server = HttpServer::with_options("127.0.0.1", 0, None, options);
    server.start().expect("server should start");
    server
}

pub fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("client should build")
}

pub fn get(server: &HttpServer, path: &str) -> reqwest::blocking::Response {
    client()
        .get(server.url_for(path))
        .send()
        .expect("request should complete")
}

/// Server config for the self-signed `localhost` certificate in
/// `tests/fixtures`.
pub fn tls_config() -> std::sync::Arc<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut &include_bytes!("../fixtures/cert.pem")[..])
        .collect::<Result<Vec<_>, _>>()
        .expect("certificate should parse");
    let key = rustls_pemfile::private_key(&mut &include_bytes!("../fixtures/key.pem")[..])
        .expect("key should parse")
        .expect("key file should hold a key");

    let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions should be supported")
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("certificate and key should match");
    std::sync::Arc::new(config)
}

/// Client trusting any certificate, for the self-signed fixture.
pub fn insecure_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .danger_accept_invalid_certs(true)
        .build()
        .expect("client should build")
}
