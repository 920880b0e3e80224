//! Startup orchestration.
//!
//! Order: bind → router serving → RPC server serving → console self-dial →
//! console serving. Any failure before the gateway is returned is fatal and
//! tears down whatever already started.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::Span;

use super::shutdown::Shutdown;
use crate::config::GatewayConfig;
use crate::console::{self, Console, ConsoleError};
use crate::net::listener::{self, ListenerError};
use crate::net::matcher::grpc;
use crate::net::{Mux, MuxConnectInfo, MuxError, MuxHandle};
use crate::rpc::{proto, CrudService};
use crate::store::Store;

/// Time allowed for servers to drain after shutdown is triggered.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Request span carrying the router's connection id.
#[derive(Debug, Clone, Copy)]
struct RpcSpan;

impl<B> MakeSpan<B> for RpcSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> Span {
        match request.extensions().get::<MuxConnectInfo>() {
            Some(info) => tracing::debug_span!(
                "grpc",
                path = %request.uri().path(),
                connection_id = %info.id,
                peer = %info.peer_addr,
            ),
            None => tracing::debug_span!("grpc", path = %request.uri().path()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to inspect the listening socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error(transparent)]
    Mux(#[from] MuxError),

    #[error("invalid console dial address `{0}`")]
    DialAddress(String),

    #[error("console failed to start: {0}")]
    Console(#[from] ConsoleError),

    #[error("gRPC server failed: {0}")]
    Rpc(#[from] tonic::transport::Error),

    #[error("invalid reflection descriptors: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    #[error("console server failed: {0}")]
    ConsoleServe(#[source] std::io::Error),

    #[error("{0} task panicked")]
    Panicked(&'static str),
}

type Task = JoinHandle<Result<(), StartupError>>;

/// A started gateway: the router and its downstream servers.
pub struct RunningGateway {
    local_addr: SocketAddr,
    mux: MuxHandle,
    shutdown: Shutdown,
    router: JoinHandle<Result<(), MuxError>>,
    servers: Vec<(&'static str, Task)>,
}

/// Start the gateway on `config.listener.bind_address`.
pub async fn start(config: &GatewayConfig, store: Arc<dyn Store>) -> Result<RunningGateway, StartupError> {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    let tcp = listener::bind(&config.listener).await?;
    let mut mux = Mux::new(tcp, config.mux.clone()).map_err(StartupError::Socket)?;
    let local_addr = mux.local_addr();

    let grpc_listener = mux.register("grpc", grpc());
    let console_listener = if config.console.enabled {
        Some(mux.register_catch_all("console")?)
    } else {
        None
    };

    let handle = mux.handle();
    let shutdown = Shutdown::new();
    let router = tokio::spawn(mux.serve());

    let service = CrudService::new(store, config.rpc.clone());
    let rpc_timeout = Duration::from_secs(config.rpc.request_timeout_secs);
    let rpc_shutdown = shutdown.signal();
    let rpc: Task = tokio::spawn(async move {
        Server::builder()
            .timeout(rpc_timeout)
            .layer(TraceLayer::new_for_grpc().make_span_with(RpcSpan))
            .add_service(service.into_server())
            .add_service(reflection)
            .serve_with_incoming_shutdown(grpc_listener.into_incoming(), rpc_shutdown)
            .await?;
        tracing::info!("gRPC server stopped");
        Ok(())
    });
    tracing::info!(address = %local_addr, "gRPC server serving");

    let mut gateway = RunningGateway {
        local_addr,
        mux: handle,
        shutdown,
        router,
        servers: vec![("rpc", rpc)],
    };

    if let Some(console_listener) = console_listener {
        match start_console(config, local_addr, console_listener, &gateway.shutdown).await {
            Ok(task) => gateway.servers.push(("console", task)),
            Err(e) => {
                let _ = gateway.stop().await;
                return Err(e);
            }
        }
    }

    tracing::info!(address = %local_addr, console = config.console.enabled, "Gateway started");
    Ok(gateway)
}

async fn start_console(
    config: &GatewayConfig,
    local_addr: SocketAddr,
    listener: crate::net::VirtualListener,
    shutdown: &Shutdown,
) -> Result<Task, StartupError> {
    let address = match &config.console.dial_address {
        Some(raw) => raw
            .parse::<SocketAddr>()
            .map_err(|_| StartupError::DialAddress(raw.clone()))?,
        None => listener::dialable(local_addr),
    };

    let channel = console::dial(address, &config.console).await?;
    let console = Console::new(channel, &config.console);
    let signal = shutdown.signal();
    Ok(tokio::spawn(async move {
        console
            .run(listener, signal)
            .await
            .map_err(StartupError::ConsoleServe)
    }))
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn mux(&self) -> &MuxHandle {
        &self.mux
    }

    /// Run until `signal` resolves or the router stops on its own, then stop.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), StartupError>
    where
        F: std::future::Future<Output = ()>,
    {
        let stopped = tokio::select! {
            _ = signal => None,
            result = &mut self.router => Some(result),
        };

        match stopped {
            None => self.stop().await,
            Some(result) => {
                tracing::error!("Connection router stopped unexpectedly");
                let router_result = flatten("router", result.map(|r| r.map_err(StartupError::from)));
                let servers_result = self.shutdown_servers().await;
                router_result.and(servers_result)
            }
        }
    }

    /// Close the router and drain every server.
    pub async fn stop(mut self) -> Result<(), StartupError> {
        self.mux.close();
        let router_result = flatten(
            "router",
            (&mut self.router)
                .await
                .map(|r| r.map_err(StartupError::from)),
        );
        let servers_result = self.shutdown_servers().await;
        router_result.and(servers_result)
    }

    async fn shutdown_servers(self) -> Result<(), StartupError> {
        self.mux.close();
        self.shutdown.trigger();

        let mut result = Ok(());
        for (name, task) in self.servers {
            match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
                Ok(joined) => {
                    if let Err(e) = flatten(name, joined) {
                        tracing::error!(server = name, error = %e, "Server exited with error");
                        result = result.and(Err(e));
                    }
                }
                Err(_) => tracing::warn!(server = name, "Server did not drain in time"),
            }
        }

        if !self.mux.wait_idle(DRAIN_TIMEOUT).await {
            tracing::warn!(pending = self.mux.pending(), "Connections still mid-classification");
        }
        tracing::info!("Gateway stopped");
        result
    }
}

fn flatten(
    name: &'static str,
    joined: Result<Result<(), StartupError>, tokio::task::JoinError>,
) -> Result<(), StartupError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(StartupError::Panicked(name)),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MuxConfig;
    use tokio::net::TcpListener;

    async fn gateway_with(
        router: JoinHandle<Result<(), MuxError>>,
        servers: Vec<(&'static str, Task)>,
        shutdown: Shutdown,
    ) -> RunningGateway {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mux = Mux::new(tcp, MuxConfig::default()).unwrap();
        RunningGateway {
            local_addr: mux.local_addr(),
            mux: mux.handle(),
            shutdown,
            router,
            servers,
        }
    }

    #[tokio::test]
    async fn server_error_surfaces_when_router_stops_early() {
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        let server: Task = tokio::spawn(async move {
            signal.await;
            Err(StartupError::ConsoleServe(std::io::Error::other("drain failed")))
        });
        let router = tokio::spawn(async { Ok(()) });
        let gateway = gateway_with(router, vec![("console", server)], shutdown).await;

        let result = gateway.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(StartupError::ConsoleServe(_))));
    }

    #[tokio::test]
    async fn router_error_wins_over_server_error() {
        let shutdown = Shutdown::new();
        let server: Task = tokio::spawn(async { Err(StartupError::Panicked("console")) });
        let router = tokio::spawn(async {
            Err(MuxError::Socket(std::io::Error::other("accept failed")))
        });
        let gateway = gateway_with(router, vec![("console", server)], shutdown).await;

        let result = gateway.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(StartupError::Mux(MuxError::Socket(_)))));
    }
}
