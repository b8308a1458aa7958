use super::trace::{OriginTrace, attach_origin};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Opens outbound connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: AsyncRead + AsyncWrite + Unpin + Send;

    /// Set by connectors that already attach origin traces.
    const INSTRUMENTED: bool = false;

    async fn connect(&self, addr: &str) -> io::Result<Self::Connection>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpStream;

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

/// Wrap a connector so that its connections remember where they were opened.
pub fn instrument<C: Connector>(connector: C) -> TracedConnector<C> {
    TracedConnector::new(connector)
}

/// Connector decorator capturing an [`OriginTrace`] for every connection.
///
/// A failed connect attempt, and the first I/O error the connection raises
/// afterwards, carry the trace captured when `connect` was called. Wrapping a
/// connector that is already instrumented adds nothing.
#[derive(Debug, Clone, Default)]
pub struct TracedConnector<C> {
    inner: C,
}

impl<C: Connector> TracedConnector<C> {
    /// Wrap `inner`; same as [`instrument`].
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Connector> Connector for TracedConnector<C> {
    type Connection = TracedConnection<C::Connection>;

    const INSTRUMENTED: bool = true;

    async fn connect(&self, addr: &str) -> io::Result<Self::Connection> {
        if C::INSTRUMENTED {
            let connection = self.inner.connect(addr).await?;
            return Ok(TracedConnection::untraced(connection));
        }

        let origin = OriginTrace::capture();
        match self.inner.connect(addr).await {
            Ok(connection) => Ok(TracedConnection::new(connection, origin)),
            Err(e) => {
                tracing::debug!(addr, error = %e, "traced connect failed");
                Err(attach_origin(e, &origin))
            }
        }
    }
}

/// A connection carrying the trace of where it was opened.
///
/// The trace is handed to the first error the connection raises and is
/// dropped with the connection otherwise.
#[derive(Debug)]
pub struct TracedConnection<S> {
    inner: S,
    origin: Option<OriginTrace>,
}

impl<S> TracedConnection<S> {
    /// Attach `origin` to an open connection.
    pub fn new(inner: S, origin: OriginTrace) -> Self {
        Self {
            inner,
            origin: Some(origin),
        }
    }

    fn untraced(inner: S) -> Self {
        Self {
            inner,
            origin: None,
        }
    }

    /// The trace, until an error has consumed it.
    pub fn origin_trace(&self) -> Option<&OriginTrace> {
        self.origin.as_ref()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn attribute(&mut self, err: io::Error) -> io::Error {
        match self.origin.take() {
            Some(origin) => attach_origin(err, &origin),
            None => err,
        }
    }

    fn attribute_poll<T>(&mut self, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        match poll {
            Poll::Ready(Err(e)) => Poll::Ready(Err(self.attribute(e))),
            other => other,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TracedConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        this.attribute_poll(poll)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TracedConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.attribute_poll(poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.attribute_poll(poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        this.attribute_poll(poll)
    }
}
