use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, BufStream, ReadBuf};
use tokio::net::TcpStream;

#[cfg(feature = "ssl")]
use openssl::ssl::SslConnector;

#[cfg(feature = "ssl")]
use tokio_openssl::SslStream;

// The engine only needs an ordered byte stream; TCP, TLS and the in-memory
// test transport all erase to this.
trait Transport: AsyncRead + AsyncWrite + Send + Unpin + Debug {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + Debug {}

/// Byte stream under a connection. `peer` is kept only for transports that
/// can be reopened to the same node.
#[derive(Debug)]
pub(crate) struct Stream {
  transport: Box<dyn Transport>,
  peer: Option<SocketAddr>,
}

impl Stream {
  pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>) -> io::Result<Self> {
    let addrs = addrs.into();
    let stream = TcpStream::connect(addrs.as_slice()).await?;
    let peer = stream.peer_addr()?;
    Ok(Self {
      transport: Box::new(BufStream::new(stream)),
      peer: Some(peer),
    })
  }

  #[cfg(feature = "ssl")]
  pub async fn connect_ssl(
    addrs: impl Into<Vec<SocketAddr>>,
    domain: impl Into<String>,
    ssl_connector: SslConnector,
  ) -> io::Result<Self> {
    let addrs = addrs.into();
    let stream = TcpStream::connect(addrs.as_slice()).await.map(BufStream::new)?;
    let domain = domain.into();

    let configuration = ssl_connector
      .configure()
      .map_err(|_| io::Error::new(io::ErrorKind::Other, "failed to create ssl configuration"))?;

    let ssl = configuration
      .into_ssl(domain.as_str())
      .map_err(|_| io::Error::new(io::ErrorKind::Other, "failed to create ssl context"))?;

    let mut tls =
      SslStream::new(ssl, stream).map_err(|_| io::Error::new(io::ErrorKind::Other, "failed to create ssl stream"))?;

    Pin::new(&mut tls)
      .connect()
      .await
      .map_err(|err| io::Error::new(io::ErrorKind::ConnectionRefused, err.to_string()))?;

    // Reopening would have to redo the handshake, so no peer is kept.
    Ok(Self {
      transport: Box::new(tls),
      peer: None,
    })
  }

  #[cfg(test)]
  pub fn mem(stream: tokio::io::DuplexStream) -> Self {
    Self {
      transport: Box::new(stream),
      peer: None,
    }
  }

  /// A fresh stream to the same node, for transports that know their peer.
  pub async fn duplicate(&self) -> io::Result<Self> {
    match self.peer {
      Some(peer) => Self::connect_tcp(vec![peer]).await,
      None => Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "this transport cannot be reopened",
      )),
    }
  }
}

impl AsyncRead for Stream {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut *self.get_mut().transport).poll_read(cx, buf)
  }
}

impl AsyncWrite for Stream {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    Pin::new(&mut *self.get_mut().transport).poll_write(cx, buf)
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut *self.get_mut().transport).poll_flush(cx)
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut *self.get_mut().transport).poll_shutdown(cx)
  }
}
