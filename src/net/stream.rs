//! The connection type handed to virtual listeners.
//!
//! Classification reads bytes off the socket; a [`MuxedStream`] replays them
//! to the downstream server before any fresh socket read, so the server sees
//! the connection exactly as the client wrote it.

use bytes::{Buf, Bytes};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tonic::transport::server::Connected;

use crate::net::connection::ConnectionId;

/// A classified connection: buffered prefix followed by the live socket.
#[derive(Debug)]
pub struct MuxedStream {
    id: ConnectionId,
    prefix: Bytes,
    inner: TcpStream,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl MuxedStream {
    pub(crate) fn new(
        id: ConnectionId,
        prefix: Bytes,
        inner: TcpStream,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            id,
            prefix,
            inner,
            peer_addr,
            local_addr,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bytes read during classification that have not been replayed yet.
    pub fn buffered(&self) -> &[u8] {
        &self.prefix
    }

    /// Split into the unreplayed prefix and the raw socket.
    pub fn into_parts(self) -> (Bytes, TcpStream) {
        (self.prefix, self.inner)
    }
}

impl AsyncRead for MuxedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MuxedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Connection metadata exposed to tonic handlers via request extensions.
#[derive(Debug, Clone)]
pub struct MuxConnectInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
}

impl Connected for MuxedStream {
    type ConnectInfo = MuxConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        MuxConnectInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            local_addr: self.local_addr,
        }
    }
}
