//! Multiplexed sessions over one encrypted connection
//!
//! A [`Session`] is a cheap, cloneable handle onto a yamux connection. The
//! connection itself is owned by a driver task which services stream-open
//! requests, forwards streams opened by the peer and fires the session's
//! close notification exactly once when the connection ends.

use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::VecDeque,
    future::poll_fn,
    net::SocketAddr,
    sync::Arc,
    task::Poll,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, mpsc, oneshot},
};
use tokio_util::{
    compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt},
    sync::CancellationToken,
};
use tracing::debug;
use yamux::{Config, Connection, ConnectionError, Mode};

use crate::socks5::protocol::{AuthMethod, Version};

/// Upper bound on one health-check round trip
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Stream is one logical stream of a session, usable with tokio I/O
pub type Stream = Compat<yamux::Stream>;

type OpenReply = oneshot::Sender<yamux::Stream>;

enum Command {
    Open(OpenReply),
    Close,
}

enum Event {
    Inbound(yamux::Stream),
    CloseRequested,
    Eof,
    Failed(ConnectionError),
}

struct Inner {
    remote_addr: SocketAddr,
    commands: mpsc::UnboundedSender<Command>,
    inbound: Mutex<mpsc::UnboundedReceiver<yamux::Stream>>,
    closed: CancellationToken,
}

/// Session is a handle to one multiplexed connection. Dropping the last
/// handle closes the connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// client starts a session in the initiating role (agent side)
    pub fn client<T>(io: T, remote_addr: SocketAddr) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn(io, remote_addr, Mode::Client)
    }

    /// server starts a session in the accepting role (relay side)
    pub fn server<T>(io: T, remote_addr: SocketAddr) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn(io, remote_addr, Mode::Server)
    }

    fn spawn<T>(io: T, remote_addr: SocketAddr, mode: Mode) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = Connection::new(TokioAsyncReadCompatExt::compat(io), Config::default(), mode);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        tokio::spawn(drive(
            connection,
            command_rx,
            inbound_tx,
            closed.clone(),
            remote_addr,
        ));

        Self {
            inner: Arc::new(Inner {
                remote_addr,
                commands: command_tx,
                inbound: Mutex::new(inbound_rx),
                closed,
            }),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// closed resolves once the session has terminated
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// close asks the driver to shut the connection down. Returns at once;
    /// await [`Session::closed`] to observe the result.
    pub fn close(&self) {
        let _ = self.inner.commands.send(Command::Close);
    }

    /// open_stream opens a new outbound logical stream. The peer only
    /// sees it, in [`Session::accept_stream`], once the first byte is written.
    pub async fn open_stream(&self) -> Result<Stream> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Open(reply_tx))
            .map_err(|_| anyhow!("session closed"))?;

        // The driver drops the reply when the open fails
        let stream = reply_rx
            .await
            .map_err(|_| anyhow!("failed to open stream: session closed"))?;

        Ok(stream.compat())
    }

    /// accept_stream waits for the peer to open a stream. Errors once
    /// the session is closed.
    pub async fn accept_stream(&self) -> Result<Stream> {
        let mut inbound = self.inner.inbound.lock().await;
        inbound
            .recv()
            .await
            .map(FuturesAsyncReadCompatExt::compat)
            .ok_or_else(|| anyhow!("session closed"))
    }

    /// health_check proves the far end serves streams: a probe stream
    /// carries a SOCKS5 greeting offering "no authentication" and must get
    /// a SOCKS5 method-selection reply back. Returns the round-trip time.
    pub async fn health_check(&self) -> Result<Duration> {
        let started = Instant::now();

        let probe = async {
            let mut stream = self.open_stream().await?;
            stream
                .write_all(&[Version::SOCKS5 as u8, 1, AuthMethod::NoAuth as u8])
                .await?;
            stream.flush().await?;

            let mut reply = [0u8; 2];
            stream.read_exact(&mut reply).await?;
            if reply[0] != Version::SOCKS5 as u8 {
                bail!("unexpected health check reply {reply:02x?}");
            }

            let _ = stream.shutdown().await;
            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .context("health check timed out")??;

        Ok(started.elapsed())
    }
}

/// drive owns the yamux connection for the lifetime of the session
async fn drive<T>(
    mut connection: Connection<Compat<T>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<yamux::Stream>,
    closed: CancellationToken,
    remote_addr: SocketAddr,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut pending_opens: VecDeque<OpenReply> = VecDeque::new();

    let result = loop {
        let event = poll_fn(|cx| {
            loop {
                match commands.poll_recv(cx) {
                    Poll::Ready(Some(Command::Open(reply))) => pending_opens.push_back(reply),
                    // Close request, or every handle dropped
                    Poll::Ready(Some(Command::Close)) | Poll::Ready(None) => {
                        return Poll::Ready(Event::CloseRequested);
                    }
                    Poll::Pending => break,
                }
            }

            while !pending_opens.is_empty() {
                match connection.poll_new_outbound(cx) {
                    Poll::Ready(Ok(stream)) => {
                        if let Some(reply) = pending_opens.pop_front() {
                            let _ = reply.send(stream);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Event::Failed(e)),
                    Poll::Pending => break,
                }
            }

            match connection.poll_next_inbound(cx) {
                Poll::Ready(Some(Ok(stream))) => Poll::Ready(Event::Inbound(stream)),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Event::Failed(e)),
                Poll::Ready(None) => Poll::Ready(Event::Eof),
                Poll::Pending => Poll::Pending,
            }
        })
        .await;

        match event {
            Event::Inbound(stream) => {
                // Dropped (and reset) once no handle is left to accept it
                let _ = inbound.send(stream);
            }
            Event::CloseRequested => break poll_fn(|cx| connection.poll_close(cx)).await,
            Event::Eof => break Ok(()),
            Event::Failed(e) => break Err(e),
        }
    };

    match result {
        Ok(()) => debug!(remote_addr = %remote_addr, "session closed"),
        Err(e) => debug!(remote_addr = %remote_addr, "session terminated: {e}"),
    }

    closed.cancel();
}
