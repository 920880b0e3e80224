//! Connection router: one TCP listener demultiplexed into virtual listeners.
//!
//! # Data Flow
//! ```text
//! TcpListener::accept (single accept loop, semaphore backpressure)
//!     → spawn classification task per connection
//!         → read into prefix buffer (time + size budget)
//!         → evaluate rules in registration order
//!     → winning VirtualListener queue (prefix replayed by MuxedStream)
//!     → or catch-all, or close
//! ```
//!
//! # Design Decisions
//! - `serve` consumes the router, so it can only run once
//! - A rule wins only when every earlier rule has rejected
//! - Per-connection failures are logged and never reach `serve`'s caller
//! - Closing flips a watch channel observed by every accept and classification

use bytes::BytesMut;
use futures_util::stream::{BoxStream, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};

use crate::config::MuxConfig;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::matcher::{Decision, Matcher};
use crate::net::stream::MuxedStream;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

const READ_CHUNK: usize = 1024;

/// Errors surfaced by the router and its virtual listeners.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The real listening socket failed; the router has stopped.
    #[error("listening socket failed: {0}")]
    Socket(#[source] io::Error),

    /// The router was closed; no further connections will arrive.
    #[error("virtual listener is closed")]
    ListenerClosed,

    /// `register_catch_all` was called twice.
    #[error("a catch-all listener is already registered")]
    DuplicateCatchAll,
}

struct Sink {
    name: Arc<str>,
    tx: mpsc::Sender<MuxedStream>,
}

struct Route {
    sink: Sink,
    matcher: Box<dyn Matcher>,
}

struct Routes {
    rules: Vec<Route>,
    catch_all: Option<Sink>,
}

/// The connection router.
pub struct Mux {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: MuxConfig,
    rules: Vec<Route>,
    catch_all: Option<Sink>,
    closed: Arc<watch::Sender<bool>>,
    tracker: ConnectionTracker,
}

impl Mux {
    pub fn new(listener: TcpListener, config: MuxConfig) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (closed, _) = watch::channel(false);
        Ok(Self {
            listener,
            local_addr,
            config,
            rules: Vec::new(),
            catch_all: None,
            closed: Arc::new(closed),
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a rule. Rules are evaluated in registration order.
    pub fn register(&mut self, name: &str, matcher: impl Matcher) -> VirtualListener {
        let (sink, listener) = self.virtual_listener(name);
        self.rules.push(Route {
            sink,
            matcher: Box::new(matcher),
        });
        tracing::debug!(listener = name, position = self.rules.len(), "Rule registered");
        listener
    }

    /// Register the listener for connections no rule matched.
    pub fn register_catch_all(&mut self, name: &str) -> Result<VirtualListener, MuxError> {
        if self.catch_all.is_some() {
            return Err(MuxError::DuplicateCatchAll);
        }
        let (sink, listener) = self.virtual_listener(name);
        self.catch_all = Some(sink);
        tracing::debug!(listener = name, "Catch-all registered");
        Ok(listener)
    }

    /// A handle that can close the router from another task.
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            closed: Arc::clone(&self.closed),
            tracker: self.tracker.clone(),
        }
    }

    fn virtual_listener(&self, name: &str) -> (Sink, VirtualListener) {
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let sink = Sink {
            name: Arc::clone(&name),
            tx,
        };
        let listener = VirtualListener {
            name,
            rx,
            closed: self.closed.subscribe(),
            local_addr: self.local_addr,
        };
        (sink, listener)
    }

    /// Accept and dispatch until closed or until the listening socket fails.
    pub async fn serve(self) -> Result<(), MuxError> {
        let Mux {
            listener,
            local_addr,
            config,
            rules,
            catch_all,
            closed,
            tracker,
        } = self;

        let routes = Arc::new(Routes { rules, catch_all });
        let limit = Arc::new(Semaphore::new(config.max_pending));
        let mut closed_rx = closed.subscribe();
        let mut accept_failures = 0u32;

        tracing::info!(
            address = %local_addr,
            rules = routes.rules.len(),
            catch_all = routes.catch_all.is_some(),
            "Connection router serving"
        );

        let result = loop {
            // Acquire permit first (backpressure)
            let permit = tokio::select! {
                _ = closed_rx.wait_for(|closed| *closed) => break Ok(()),
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let accepted = tokio::select! {
                _ = closed_rx.wait_for(|closed| *closed) => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    accept_failures = 0;
                    let guard = tracker.track();
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer_addr = %peer_addr,
                        available_permits = limit.available_permits(),
                        "Connection accepted"
                    );
                    let task = Classification {
                        routes: Arc::clone(&routes),
                        config: config.clone(),
                        closed: closed.subscribe(),
                        local_addr,
                    };
                    tokio::spawn(async move {
                        task.run(stream, peer_addr, guard).await;
                        drop(permit);
                    });
                }
                Err(e) if is_transient(&e) => {
                    accept_failures = accept_failures.saturating_add(1);
                    let delay = calculate_backoff(accept_failures, 5, 1_000);
                    tracing::warn!(error = %e, delay = ?delay, "Transient accept error");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Listening socket failed");
                    break Err(MuxError::Socket(e));
                }
            }
        };

        // Whatever stopped the loop, virtual listeners must not hang.
        closed.send_replace(true);
        tracing::info!(address = %local_addr, "Connection router stopped");
        result
    }
}

/// Errors from `accept` that concern one connection rather than the socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || matches!(e.raw_os_error(), Some(23) | Some(24))
}

/// Cloneable control handle for a router.
#[derive(Clone)]
pub struct MuxHandle {
    closed: Arc<watch::Sender<bool>>,
    tracker: ConnectionTracker,
}

impl MuxHandle {
    /// Stop accepting and close every virtual listener.
    ///
    /// Connections already accepted by a downstream server are unaffected.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::info!("Connection router closing");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Connections accepted but not yet handed to a virtual listener.
    pub fn pending(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Wait until no connection is mid-classification.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout).await
    }
}

/// An in-process accept queue fed by the router.
pub struct VirtualListener {
    name: Arc<str>,
    rx: mpsc::Receiver<MuxedStream>,
    closed: watch::Receiver<bool>,
    local_addr: SocketAddr,
}

impl VirtualListener {
    /// Wait for the next connection routed to this listener.
    ///
    /// Returns [`MuxError::ListenerClosed`] once the router is closed.
    pub async fn accept(&mut self) -> Result<MuxedStream, MuxError> {
        tokio::select! {
            biased;
            _ = self.closed.wait_for(|closed| *closed) => Err(MuxError::ListenerClosed),
            conn = self.rx.recv() => conn.ok_or(MuxError::ListenerClosed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the real socket behind this listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Adapt into a connection stream that ends when the router closes.
    pub fn into_incoming(self) -> BoxStream<'static, Result<MuxedStream, io::Error>> {
        futures_util::stream::unfold(self, |mut listener| async move {
            match listener.accept().await {
                Ok(conn) => Some((Ok(conn), listener)),
                Err(_) => None,
            }
        })
        .boxed()
    }
}

impl std::fmt::Debug for VirtualListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualListener")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Why a connection matched no rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unmatched {
    /// Every rule rejected the prefix.
    Rejected,
    /// The time budget ran out.
    Timeout,
    /// The size budget ran out.
    Overflow,
    /// The client stopped sending.
    Eof,
    /// Reading from the client failed.
    ReadError(io::ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Matched(usize),
    Unmatched(Unmatched),
}

/// Evaluate rules in order. `None` means a rule needs more bytes before
/// the first match can be determined.
///
/// With `exhausted` set no more bytes will arrive, so `NeedMore` counts as a
/// rejection and the exhaustion reason replaces `Rejected`.
fn evaluate(matchers: &[&dyn Matcher], prefix: &[u8], exhausted: Option<Unmatched>) -> Option<Verdict> {
    for (idx, matcher) in matchers.iter().enumerate() {
        match matcher.inspect(prefix) {
            Decision::Match => return Some(Verdict::Matched(idx)),
            Decision::Reject => {}
            Decision::NeedMore if exhausted.is_some() => {}
            Decision::NeedMore => return None,
        }
    }
    Some(Verdict::Unmatched(exhausted.unwrap_or(Unmatched::Rejected)))
}

/// Read from `stream` until the rules decide or a budget runs out.
///
/// Returns the verdict together with every byte read so far.
pub(crate) async fn classify<S>(
    stream: &mut S,
    matchers: &[&dyn Matcher],
    config: &MuxConfig,
) -> (Verdict, BytesMut)
where
    S: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + config.read_timeout();
    let mut buf = BytesMut::new();

    loop {
        if let Some(verdict) = evaluate(matchers, &buf, None) {
            return (verdict, buf);
        }

        if buf.len() >= config.max_prefix_bytes {
            let verdict = evaluate(matchers, &buf, Some(Unmatched::Overflow));
            return (verdict.unwrap_or(Verdict::Unmatched(Unmatched::Overflow)), buf);
        }

        let want = READ_CHUNK.min(config.max_prefix_bytes - buf.len());
        buf.reserve(want);
        let mut limited = (&mut *stream).take(want as u64);
        let exhausted = match tokio::time::timeout_at(deadline, limited.read_buf(&mut buf)).await {
            Ok(Ok(0)) => Unmatched::Eof,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => return (Verdict::Unmatched(Unmatched::ReadError(e.kind())), buf),
            Err(_) => Unmatched::Timeout,
        };

        let verdict = evaluate(matchers, &buf, Some(exhausted));
        return (verdict.unwrap_or(Verdict::Unmatched(exhausted)), buf);
    }
}

/// Per-connection classification and dispatch.
struct Classification {
    routes: Arc<Routes>,
    config: MuxConfig,
    closed: watch::Receiver<bool>,
    local_addr: SocketAddr,
}

impl Classification {
    async fn run(mut self, mut stream: TcpStream, peer_addr: SocketAddr, guard: ConnectionGuard) {
        let id = guard.id();
        let started = Instant::now();
        let matchers: Vec<&dyn Matcher> = self
            .routes
            .rules
            .iter()
            .map(|route| route.matcher.as_ref())
            .collect();

        let (verdict, prefix) = tokio::select! {
            outcome = classify(&mut stream, &matchers, &self.config) => outcome,
            _ = self.closed.wait_for(|closed| *closed) => {
                tracing::debug!(connection_id = %id, "Router closed during classification");
                metrics::record_classification("closed", started);
                return;
            }
        };

        let sink = match verdict {
            Verdict::Matched(idx) => &self.routes.rules[idx].sink,
            Verdict::Unmatched(Unmatched::ReadError(kind)) => {
                tracing::debug!(connection_id = %id, error = ?kind, "Read failed during classification");
                metrics::record_classification("closed", started);
                return;
            }
            Verdict::Unmatched(reason @ (Unmatched::Eof | Unmatched::Timeout)) if prefix.is_empty() => {
                tracing::debug!(connection_id = %id, reason = ?reason, "Client sent nothing; closing connection");
                metrics::record_classification("closed", started);
                return;
            }
            Verdict::Unmatched(reason) => match &self.routes.catch_all {
                Some(sink) => sink,
                None => {
                    tracing::debug!(
                        connection_id = %id,
                        peer_addr = %peer_addr,
                        reason = ?reason,
                        buffered = prefix.len(),
                        "No rule matched; closing connection"
                    );
                    metrics::record_classification("closed", started);
                    return;
                }
            },
        };

        if *self.closed.borrow() {
            tracing::debug!(connection_id = %id, listener = %sink.name, "Dispatch after close; dropping connection");
            metrics::record_classification("closed", started);
            return;
        }

        let conn = MuxedStream::new(id, prefix.freeze(), stream, peer_addr, self.local_addr);
        tokio::select! {
            sent = sink.tx.send(conn) => match sent {
                Ok(()) => {
                    tracing::debug!(
                        connection_id = %id,
                        listener = %sink.name,
                        elapsed = ?started.elapsed(),
                        "Connection dispatched"
                    );
                    metrics::record_classification(&sink.name, started);
                }
                Err(_) => {
                    tracing::debug!(connection_id = %id, listener = %sink.name, "Virtual listener dropped; closing connection");
                    metrics::record_classification("closed", started);
                }
            },
            _ = self.closed.wait_for(|closed| *closed) => {
                tracing::debug!(connection_id = %id, listener = %sink.name, "Router closed while queueing");
                metrics::record_classification("closed", started);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::matcher::{Any, Http1, Prefix};
    use tokio::io::AsyncWriteExt;

    fn config(read_timeout_ms: u64, max_prefix_bytes: usize) -> MuxConfig {
        MuxConfig {
            read_timeout_ms,
            max_prefix_bytes,
            ..MuxConfig::default()
        }
    }

    #[test]
    fn first_match_wins() {
        let a = Prefix::new("GET");
        let b = Http1;
        let rules: [&dyn Matcher; 2] = [&a, &b];
        assert_eq!(
            evaluate(&rules, b"GET / HTTP/1.1\r\n", None),
            Some(Verdict::Matched(0))
        );
    }

    #[test]
    fn earlier_undecided_rule_blocks_later_match() {
        let a = Prefix::new("GET /special");
        let b = Any;
        let rules: [&dyn Matcher; 2] = [&a, &b];
        assert_eq!(evaluate(&rules, b"GET /sp", None), None);
        assert_eq!(
            evaluate(&rules, b"GET /sp", Some(Unmatched::Eof)),
            Some(Verdict::Matched(1))
        );
    }

    #[test]
    fn all_rejected() {
        let a = Prefix::new("A");
        let rules: [&dyn Matcher; 1] = [&a];
        assert_eq!(
            evaluate(&rules, b"B", None),
            Some(Verdict::Unmatched(Unmatched::Rejected))
        );
    }

    #[tokio::test]
    async fn classifies_across_partial_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let http = Http1;
        let rules: [&dyn Matcher; 1] = [&http];

        let writer = tokio::spawn(async move {
            for chunk in [&b"GE"[..], b"T / HT", b"TP/1.1\r\n\r\n"] {
                client.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            client
        });

        let (verdict, prefix) = classify(&mut server, &rules, &config(1_000, 1024)).await;
        assert_eq!(verdict, Verdict::Matched(0));
        assert!(prefix.starts_with(b"GET / HTTP/1.1\r\n"));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let (_client, mut server) = tokio::io::duplex(64);
        let http = Http1;
        let rules: [&dyn Matcher; 1] = [&http];

        let (verdict, prefix) = classify(&mut server, &rules, &config(30, 1024)).await;
        assert_eq!(verdict, Verdict::Unmatched(Unmatched::Timeout));
        assert!(prefix.is_empty());
    }

    #[tokio::test]
    async fn oversized_prefix_stops_reading() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let never = Prefix::new(vec![b'x'; 4096]);
        let rules: [&dyn Matcher; 1] = [&never];

        client.write_all(&[b'x'; 100]).await.unwrap();
        let (verdict, prefix) = classify(&mut server, &rules, &config(1_000, 64)).await;
        assert_eq!(verdict, Verdict::Unmatched(Unmatched::Overflow));
        assert_eq!(prefix.len(), 64);
    }

    #[tokio::test]
    async fn prefix_never_exceeds_size_budget() {
        let (mut client, mut server) = tokio::io::duplex(8192);
        let never = Prefix::new(vec![b'x'; 8192]);
        let rules: [&dyn Matcher; 1] = [&never];

        client.write_all(&[b'x'; 5000]).await.unwrap();
        let (verdict, prefix) = classify(&mut server, &rules, &config(1_000, 1500)).await;
        assert_eq!(verdict, Verdict::Unmatched(Unmatched::Overflow));
        assert_eq!(prefix.len(), 1500);
    }

    #[tokio::test]
    async fn eof_before_decision() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let http = Http1;
        let rules: [&dyn Matcher; 1] = [&http];

        client.write_all(b"GET / HT").await.unwrap();
        drop(client);
        let (verdict, prefix) = classify(&mut server, &rules, &config(1_000, 1024)).await;
        assert_eq!(verdict, Verdict::Unmatched(Unmatched::Eof));
        assert_eq!(&prefix[..], b"GET / HT");
    }

    #[test]
    fn transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }
}
