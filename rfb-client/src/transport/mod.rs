//! Transport layer (TCP and TLS) for VNC connections.
//!
//! Produces a pair of `AsyncRead`/`AsyncWrite` halves that the handshake and
//! protocol layers build buffered [`rfb_protocol::io`] streams on top of.
//! Everything above this module is oblivious to whether the underlying bytes
//! are flowing over a bare socket or a TLS session.

mod tls;

use crate::errors::RfbClientError;
use rfb_protocol::socket::TcpSocket;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio_rustls::client::TlsStream;

pub use tls::TlsConfig;

/// An established VNC transport, prior to splitting into read/write halves.
pub enum Transport {
    /// Plain TCP, used for trusted networks or SSH tunnels.
    Plain(TcpSocket),
    /// TLS over TCP, used for VeNCrypt's TLS-based security types.
    Tls(Box<TlsStream<TcpSocket>>),
}

impl Transport {
    /// Connect over a plain TCP socket.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self, RfbClientError> {
        let socket = TcpSocket::connect(host, port)
            .await
            .map_err(|e| RfbClientError::ConnectionFailed(e.to_string()))?;
        Ok(Self::Plain(socket))
    }

    /// Connect over TCP and immediately perform a TLS handshake.
    pub async fn connect_tls(host: &str, port: u16, tls_cfg: TlsConfig) -> Result<Self, RfbClientError> {
        let socket = TcpSocket::connect(host, port)
            .await
            .map_err(|e| RfbClientError::ConnectionFailed(e.to_string()))?;
        let stream = tls::handshake(socket, host, tls_cfg).await?;
        Ok(Self::Tls(Box::new(stream)))
    }

    /// Upgrade an already-connected plain transport to TLS in place.
    ///
    /// Used by the VeNCrypt security type, which decides whether to start TLS
    /// only after the RFB version and security-subtype negotiation has already
    /// taken place over the plain socket.
    pub async fn upgrade_tls(self, host: &str, tls_cfg: TlsConfig) -> Result<Self, RfbClientError> {
        match self {
            Transport::Plain(socket) => {
                let stream = tls::handshake(socket, host, tls_cfg).await?;
                Ok(Transport::Tls(Box::new(stream)))
            }
            Transport::Tls(_) => Err(RfbClientError::TlsError(
                "transport is already TLS-wrapped".to_string(),
            )),
        }
    }

    /// Split into independent read and write halves.
    pub fn split(self) -> (TransportRead, TransportWrite) {
        match self {
            Transport::Plain(socket) => {
                let (r, w) = io::split(socket);
                (TransportRead::Plain(r), TransportWrite::Plain(w))
            }
            Transport::Tls(stream) => {
                let (r, w) = io::split(*stream);
                (TransportRead::Tls(r), TransportWrite::Tls(w))
            }
        }
    }
}

/// Read half of a [`Transport`], implementing [`AsyncRead`].
pub enum TransportRead {
    Plain(ReadHalf<TcpSocket>),
    Tls(ReadHalf<TlsStream<TcpSocket>>),
}

/// Write half of a [`Transport`], implementing [`AsyncWrite`].
pub enum TransportWrite {
    Plain(WriteHalf<TcpSocket>),
    Tls(WriteHalf<TlsStream<TcpSocket>>),
}

impl AsyncRead for TransportRead {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportRead::Plain(r) => Pin::new(r).poll_read(cx, buf),
            TransportRead::Tls(r) => Pin::new(r).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportWrite {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TransportWrite::Plain(w) => Pin::new(w).poll_write(cx, buf),
            TransportWrite::Tls(w) => Pin::new(w).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportWrite::Plain(w) => Pin::new(w).poll_flush(cx),
            TransportWrite::Tls(w) => Pin::new(w).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportWrite::Plain(w) => Pin::new(w).poll_shutdown(cx),
            TransportWrite::Tls(w) => Pin::new(w).poll_shutdown(cx),
        }
    }
}
