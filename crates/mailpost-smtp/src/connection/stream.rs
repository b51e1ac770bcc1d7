//! Byte streams and the strategies that open them.

#![allow(clippy::missing_errors_doc)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};

/// Opens and upgrades the byte streams a [`Connection`](super::Connection)
/// runs over.
///
/// The connection only parses bytes; where they come from (TCP, TLS, or a
/// scripted stream in tests) is decided here.
pub trait Connector {
    /// Stream type produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Unpin;

    /// Opens a plaintext stream.
    fn connect_plain(&self, host: &str, port: u16) -> impl Future<Output = Result<Self::Stream>>;

    /// Opens a stream that is encrypted before the first byte is read.
    fn connect_tls(&self, host: &str, port: u16) -> impl Future<Output = Result<Self::Stream>>;

    /// Wraps an existing plaintext stream in TLS.
    fn upgrade(
        &self,
        stream: Self::Stream,
        host: &str,
    ) -> impl Future<Output = Result<Self::Stream>>;
}

/// A stream that can be either plaintext or TLS.
pub enum SmtpStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl SmtpStream {
    /// Upgrades a plaintext stream to TLS.
    pub async fn upgrade_to_tls(self, connector: &TlsConnector, host: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => Ok(Self::Tls(Box::new(handshake(connector, tcp, host).await?))),
            Self::Tls(_) => Err(Error::InvalidState("Stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl std::fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Connector for real servers: TCP plus rustls with the webpki roots.
#[derive(Clone)]
pub struct TcpConnector {
    tls: TlsConnector,
}

impl TcpConnector {
    /// Creates a connector trusting the bundled Mozilla root certificates.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tls: create_tls_connector(),
        }
    }

    /// Creates a connector with a custom TLS client configuration.
    #[must_use]
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self {
            tls: TlsConnector::from(config),
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector").finish_non_exhaustive()
    }
}

impl Connector for TcpConnector {
    type Stream = SmtpStream;

    async fn connect_plain(&self, host: &str, port: u16) -> Result<SmtpStream> {
        let tcp = TcpStream::connect((host, port)).await?;
        tracing::debug!(host, port, "TCP connection established");
        Ok(SmtpStream::Plain(tcp))
    }

    async fn connect_tls(&self, host: &str, port: u16) -> Result<SmtpStream> {
        let tcp = TcpStream::connect((host, port)).await?;
        let tls = handshake(&self.tls, tcp, host).await?;
        tracing::debug!(host, port, "TLS connection established");
        Ok(SmtpStream::Tls(Box::new(tls)))
    }

    async fn upgrade(&self, stream: SmtpStream, host: &str) -> Result<SmtpStream> {
        stream.upgrade_to_tls(&self.tls, host).await
    }
}

async fn handshake(
    connector: &TlsConnector,
    tcp: TcpStream,
    host: &str,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::InvalidHostname(host.to_string()))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::TlsHandshake(e.to_string()))
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_handshake_against_plaintext_server_is_tls_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"220 plain.example.com ESMTP\r\n").await;
            let _ = socket.read(&mut buf).await;
        });

        let err = TcpConnector::new()
            .connect_tls("127.0.0.1", port)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TlsHandshake(_)), "{err:?}");
        assert!(err.is_tls_mismatch());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_not_tls_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpConnector::new()
            .connect_plain("127.0.0.1", port)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_tls_mismatch());
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let stream = SmtpStream::Plain(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
        assert!(!stream.is_tls());
        let err = TcpConnector::new()
            .upgrade(stream, "not a hostname!")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHostname(_)));
        server.await.unwrap().unwrap();
    }
}
