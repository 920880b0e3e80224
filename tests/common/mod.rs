//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::transport::{Channel, Endpoint};

use crud_gateway::config::{GatewayConfig, MuxConfig, StoreBackend};
use crud_gateway::lifecycle::{self, RunningGateway};
use crud_gateway::net::matcher::HTTP2_PREFACE;
use crud_gateway::net::Mux;
use crud_gateway::rpc::ServiceExampleServiceClient;
use crud_gateway::store::MemoryStore;

/// Gateway config bound to an ephemeral loopback port with the in-memory store.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.database.backend = StoreBackend::Memory;
    config.console.dial_timeout_secs = 5;
    config
}

/// Start a full gateway backed by a fresh in-memory store.
pub async fn start_gateway() -> RunningGateway {
    lifecycle::start(&test_config(), Arc::new(MemoryStore::new()))
        .await
        .expect("gateway should start")
}

pub fn grpc_channel(addr: SocketAddr) -> Channel {
    Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .timeout(Duration::from_secs(5))
        .connect_lazy()
}

pub fn grpc_client(addr: SocketAddr) -> ServiceExampleServiceClient<Channel> {
    ServiceExampleServiceClient::new(grpc_channel(addr))
}

/// A router on an ephemeral loopback port.
pub async fn bind_mux(read_timeout_ms: u64) -> Mux {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = MuxConfig {
        read_timeout_ms,
        ..MuxConfig::default()
    };
    Mux::new(listener, config).unwrap()
}

fn frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() as u32).to_be_bytes();
    let mut out = vec![len[1], len[2], len[3], kind, flags];
    out.extend_from_slice(&stream_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Preface, an empty SETTINGS frame and a HEADERS frame opening a gRPC call.
pub fn grpc_request_prefix() -> Vec<u8> {
    let mut encoder = hpack::Encoder::new();
    let block = encoder.encode(vec![
        (&b":method"[..], &b"POST"[..]),
        (&b":scheme"[..], &b"http"[..]),
        (&b":path"[..], &b"/example.service.ServiceExampleService/GetUser"[..]),
        (&b":authority"[..], &b"localhost"[..]),
        (&b"content-type"[..], &b"application/grpc"[..]),
        (&b"te"[..], &b"trailers"[..]),
    ]);

    http2_headers_prefix(&block)
}

/// Preface, an empty SETTINGS frame and one HEADERS frame carrying `block`.
pub fn http2_headers_prefix(block: &[u8]) -> Vec<u8> {
    let mut out = HTTP2_PREFACE.to_vec();
    out.extend(frame(0x4, 0, 0, &[]));
    out.extend(frame(0x1, 0x4, 1, block));
    out
}

pub fn http_get(path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").into_bytes()
}
