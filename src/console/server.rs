//! Console HTTP server over the router's catch-all listener.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header::HeaderName,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tonic::transport::{Channel, Endpoint};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::methods::{self, Client, MethodInfo, METHOD_NAMES};
use super::reflection::Reflector;
use super::ConsoleError;
use crate::config::ConsoleConfig;
use crate::net::{MuxedStream, VirtualListener};
use crate::resilience::backoff::retry_within;
use crate::rpc::{REFLECTION_SERVICE_NAME, SERVICE_NAME};

const X_REQUEST_ID: &str = "x-request-id";
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct ConsoleState {
    client: Client,
    reflector: Reflector,
}

/// Adapts a [`VirtualListener`] to `axum::serve`.
///
/// Once the router closes, `accept` never resolves again; the server is
/// expected to stop through its graceful-shutdown signal.
pub struct ConsoleListener {
    inner: VirtualListener,
}

impl ConsoleListener {
    pub fn new(inner: VirtualListener) -> Self {
        Self { inner }
    }
}

impl axum::serve::Listener for ConsoleListener {
    type Io = MuxedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.inner.accept().await {
            Ok(stream) => {
                let peer = stream.peer_addr();
                (stream, peer)
            }
            Err(_) => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.inner.local_addr())
    }
}

/// Dial the gateway's own gRPC endpoint through the shared port.
///
/// Reachability is retried with backoff until `dial_timeout_secs`; the
/// channel itself connects lazily so every connection it opens carries a
/// request right behind the HTTP/2 preface.
pub async fn dial(address: SocketAddr, config: &ConsoleConfig) -> Result<Channel, ConsoleError> {
    let budget = Duration::from_secs(config.dial_timeout_secs);
    retry_within(budget, 50, 1_000, |attempt| async move {
        tracing::debug!(address = %address, attempt, "Dialing gateway");
        TcpStream::connect(address).await
    })
    .await
    .map_err(|source| ConsoleError::Dial { address, source })?;

    let channel = Endpoint::from_shared(format!("http://{address}"))?
        .connect_timeout(budget)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_lazy();

    tracing::info!(address = %address, "Console connected to gateway");
    Ok(channel)
}

pub struct Console {
    router: Router,
}

impl Console {
    pub fn new(channel: Channel, config: &ConsoleConfig) -> Self {
        let state = ConsoleState {
            client: Client::new(channel.clone()),
            reflector: Reflector::new(channel),
        };
        Self {
            router: Self::build_router(state, config),
        }
    }

    #[allow(deprecated)]
    fn build_router(state: ConsoleState, config: &ConsoleConfig) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .route("/", get(index))
            .route("/healthz", get(healthz))
            .route("/api/methods", get(list_methods))
            .route("/api/invoke/{method}", post(invoke))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))),
            )
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: VirtualListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(listener = listener.name(), address = %listener.local_addr(), "Console starting");

        axum::serve(ConsoleListener::new(listener), self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Console stopped");
        Ok(())
    }
}

async fn index() -> Html<String> {
    let rows: String = METHOD_NAMES
        .iter()
        .map(|name| format!("<li><code>POST /api/invoke/{name}</code></li>\n"))
        .collect();
    Html(format!(
        "<!doctype html>\n<html>\n<head><title>{SERVICE_NAME}</title></head>\n<body>\n\
         <h1>{SERVICE_NAME}</h1>\n<p>Request templates: <a href=\"/api/methods\">/api/methods</a></p>\n\
         <ul>\n{rows}</ul>\n</body>\n</html>\n"
    ))
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Every method the gateway reports over reflection, with request templates
/// for the ones the console can invoke.
async fn list_methods(State(state): State<ConsoleState>) -> Result<Json<Vec<MethodInfo>>, ConsoleError> {
    let mut reflector = state.reflector;
    let mut listed = Vec::new();
    for service in reflector.services().await? {
        if service == REFLECTION_SERVICE_NAME {
            continue;
        }
        listed.extend(reflector.methods(&service).await?.into_iter().map(MethodInfo::from));
    }
    Ok(Json(listed))
}

async fn invoke(
    State(state): State<ConsoleState>,
    Path(method): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ConsoleError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).map_err(ConsoleError::BadRequest)?
    };

    tracing::debug!(method = %method, "Invoking through console");
    let mut client = state.client;
    let response = methods::invoke(&mut client, &method, body).await?;
    Ok(Json(response))
}
