//! Connection-tracking listener.
//!
//! [`TrackedListener`] wraps a tokio `TcpListener` so the process can
//!
//! - count live connections: every accepted stream carries a guard that
//!   decrements the [`ConnectionCounter`] when the stream is dropped;
//! - stop accepting on request without touching connections already open;
//! - hand a duplicate of the listening socket to a successor process.
//!
//! # States
//!
//! ```text
//!   Active ──drain()──▶ Draining ──close()──▶ Closed
//! ```
//!
//! Transitions only move forward. `drain()` sends a single stop signal to a
//! waiter task spawned with the listener. The waiter flips the state to
//! `Draining` and releases the handoff duplicate; the pending `accept()`
//! observes the change and returns `Ok(None)`, and the owner then closes the
//! OS socket with [`TrackedListener::close`]. From that point new connection
//! attempts are refused by the kernel while the streams handed out earlier
//! keep working until their own tasks drop them.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, OwnedFd};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::Error;

// ── State ─────────────────────────────────────────────────────────────────────

/// Lifecycle of a [`TrackedListener`]. Ordered: a state never moves back.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ListenerState {
    /// Accepting new connections.
    Active,
    /// Told to stop; open connections are untouched.
    Draining,
    /// OS socket closed. Terminal.
    Closed,
}

fn advance(state: &watch::Sender<ListenerState>, next: ListenerState) -> bool {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    })
}

// ── ConnectionCounter ─────────────────────────────────────────────────────────

/// Number of currently open connections accepted through one listener.
///
/// Increments happen in [`ConnectionCounter::acquire`], which is the only way
/// to obtain a [`ConnectionGuard`]; the matching decrement happens when that
/// guard drops. The count therefore never goes below zero.
#[derive(Clone)]
pub struct ConnectionCounter(Arc<watch::Sender<usize>>);

impl ConnectionCounter {
    pub fn new() -> Self {
        Self(Arc::new(watch::Sender::new(0)))
    }

    /// Snapshot of the live count.
    pub fn get(&self) -> usize {
        *self.0.borrow()
    }

    /// Counts one connection until the returned guard drops.
    pub fn acquire(&self, peer: SocketAddr) -> ConnectionGuard {
        self.0.send_modify(|n| *n += 1);
        ConnectionGuard { counter: self.clone(), peer }
    }

    /// Resolves once the count reads zero.
    pub async fn wait_zero(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionCounter {
    fn default() -> Self { Self::new() }
}

/// Keeps one connection counted. Dropping it is the close observation.
pub struct ConnectionGuard {
    counter: ConnectionCounter,
    peer: SocketAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.0.send_modify(|n| {
            debug_assert!(*n > 0, "connection counter underflow");
            *n = n.saturating_sub(1);
        });
        debug!(peer = %self.peer, connections = self.counter.get(), "connection closed");
    }
}

// ── TrackedStream ─────────────────────────────────────────────────────────────

/// An accepted TCP stream that stays counted until dropped.
pub struct TrackedStream {
    stream: TcpStream,
    guard: ConnectionGuard,
}

impl TrackedStream {
    pub fn peer_addr(&self) -> SocketAddr {
        self.guard.peer
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

// ── Shared state and handle ───────────────────────────────────────────────────

struct Shared {
    local_addr: SocketAddr,
    counter: ConnectionCounter,
    state: watch::Sender<ListenerState>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    // Duplicate of the listening socket kept for handoff. Released on drain so
    // it cannot hold the port open after the accept loop closes.
    handoff: Mutex<Option<OwnedFd>>,
}

impl Shared {
    fn begin_drain(&self) {
        if advance(&self.state, ListenerState::Draining) {
            self.handoff.lock().unwrap_or_else(PoisonError::into_inner).take();
            info!(
                pid = std::process::id(),
                addr = %self.local_addr,
                connections = self.counter.get(),
                "listener draining",
            );
        }
    }
}

/// Cloneable view of a [`TrackedListener`] for code that does not own the
/// accept loop: health probes, the restart coordinator, signal handlers.
#[derive(Clone)]
pub struct ListenerHandle(Arc<Shared>);

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.0.state.borrow()
    }

    /// Live connection count.
    pub fn connections(&self) -> usize {
        self.0.counter.get()
    }

    pub fn counter(&self) -> &ConnectionCounter {
        &self.0.counter
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr
    }

    /// True until the stop signal has been sent.
    pub fn is_active(&self) -> bool {
        self.state() == ListenerState::Active && self.stop_pending()
    }

    fn stop_pending(&self) -> bool {
        self.0.stop.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Sends the stop signal. Returns `false` if it was already sent.
    pub fn drain(&self) -> bool {
        let stop = self.0.stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        match stop {
            Some(tx) => {
                // The waiter only goes away with the listener itself.
                if tx.send(()).is_err() {
                    self.0.begin_drain();
                }
                true
            }
            None => false,
        }
    }

    /// Duplicates the listening socket for a successor. The listener itself
    /// is unaffected; the duplicate is close-on-exec and outlives it.
    ///
    /// Fails with [`Error::NotActive`] once draining has been requested.
    pub fn duplicate(&self) -> Result<OwnedFd, Error> {
        if !self.stop_pending() {
            return Err(Error::NotActive);
        }
        let handoff = self.0.handoff.lock().unwrap_or_else(PoisonError::into_inner);
        match handoff.as_ref() {
            Some(fd) if self.state() == ListenerState::Active => Ok(fd.try_clone()?),
            _ => Err(Error::NotActive),
        }
    }

    /// Resolves once the listener has reached `state` or a later one.
    pub async fn wait_for(&self, state: ListenerState) {
        let mut rx = self.0.state.subscribe();
        let _ = rx.wait_for(|s| *s >= state).await;
    }

    /// Resolves once the listener is closed and every connection it accepted
    /// has been dropped.
    pub async fn wait_drained(&self) {
        self.wait_for(ListenerState::Closed).await;
        self.0.counter.wait_zero().await;
    }
}

// ── TrackedListener ───────────────────────────────────────────────────────────

/// A listening socket that counts its connections and can be drained.
///
/// Must be created inside a tokio runtime: construction spawns the stop
/// signal waiter.
pub struct TrackedListener {
    listener: Option<TcpListener>,
    state: watch::Receiver<ListenerState>,
    shared: Arc<Shared>,
}

impl TrackedListener {
    /// Binds a fresh socket.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        Self::new(TcpListener::bind(addr).await?)
    }

    /// Adopts an already bound and listening std socket.
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self, Error> {
        listener.set_nonblocking(true)?;
        Self::new(TcpListener::from_std(listener)?)
    }

    pub fn new(listener: TcpListener) -> Result<Self, Error> {
        let local_addr = listener.local_addr()?;
        let handoff = listener.as_fd().try_clone_to_owned()?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state, state_rx) = watch::channel(ListenerState::Active);

        let shared = Arc::new(Shared {
            local_addr,
            counter: ConnectionCounter::new(),
            state,
            stop: Mutex::new(Some(stop_tx)),
            handoff: Mutex::new(Some(handoff)),
        });

        tokio::spawn(stop_waiter(Arc::downgrade(&shared), stop_rx));

        Ok(Self { listener: Some(listener), state: state_rx, shared })
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle(Arc::clone(&self.shared))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Waits for the next connection.
    ///
    /// Returns `Ok(None)` once draining has begun, including when the
    /// underlying accept fails because of it. Transient per-connection
    /// failures are skipped. Any other accept error while `Active` means the
    /// socket is unusable and is returned.
    pub async fn accept(&mut self) -> Result<Option<TrackedStream>, Error> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(None);
        };

        loop {
            if *self.state.borrow() != ListenerState::Active {
                return Ok(None);
            }

            tokio::select! {
                biased;

                () = stopped(&mut self.state) => return Ok(None),

                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        let guard = self.shared.counter.acquire(peer);
                        debug!(%peer, connections = self.shared.counter.get(), "connection accepted");
                        return Ok(Some(TrackedStream { stream, guard }));
                    }
                    Err(_) if *self.shared.state.borrow() != ListenerState::Active => return Ok(None),
                    Err(e) if is_transient(&e) => {
                        warn!("accept: {e}");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    /// Closes the OS socket. Connections already handed out stay open.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.begin_drain();
        if self.listener.take().is_some() {
            advance(&self.shared.state, ListenerState::Closed);
            info!(
                pid = std::process::id(),
                addr = %self.shared.local_addr,
                connections = self.shared.counter.get(),
                "listener closed",
            );
        }
    }
}

impl Drop for TrackedListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn stopped(state: &mut watch::Receiver<ListenerState>) {
    let _ = state.wait_for(|s| *s != ListenerState::Active).await;
}

async fn stop_waiter(shared: Weak<Shared>, stop: oneshot::Receiver<()>) {
    // `Err` means the listener was dropped without a drain.
    if stop.await.is_ok() {
        if let Some(shared) = shared.upgrade() {
            shared.begin_drain();
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    use super::*;

    async fn listener() -> TrackedListener {
        TrackedListener::bind("127.0.0.1:0").await.unwrap()
    }

    async fn wait_for_count(handle: &ListenerHandle, n: usize) {
        let mut rx = handle.0.counter.0.subscribe();
        timeout(Duration::from_secs(5), rx.wait_for(|c| *c == n))
            .await
            .expect("counter never reached target")
            .unwrap();
    }

    #[tokio::test]
    async fn counts_accepts_minus_closes() {
        let mut listener = listener().await;
        let handle = listener.handle();
        let addr = listener.local_addr();

        let mut clients = Vec::new();
        let mut accepted = Vec::new();
        for _ in 0..5 {
            clients.push(TcpStream::connect(addr).await.unwrap());
            accepted.push(listener.accept().await.unwrap().unwrap());
        }
        assert_eq!(handle.connections(), 5);

        accepted.truncate(2);
        assert_eq!(handle.connections(), 2);

        drop(accepted);
        assert_eq!(handle.connections(), 0);
    }

    #[tokio::test]
    async fn drain_stops_accepting_and_keeps_open_connections() {
        let mut listener = listener().await;
        let handle = listener.handle();
        let addr = listener.local_addr();

        let mut clients = Vec::new();
        let mut accepted = Vec::new();
        for _ in 0..10 {
            clients.push(TcpStream::connect(addr).await.unwrap());
            accepted.push(listener.accept().await.unwrap().unwrap());
        }
        assert_eq!(handle.connections(), 10);

        assert!(handle.drain());
        assert!(!handle.drain());
        assert!(listener.accept().await.unwrap().is_none());
        assert_eq!(handle.state(), ListenerState::Draining);
        listener.close();
        assert_eq!(handle.state(), ListenerState::Closed);

        // Three peers hang up; their server-side streams see EOF and drop.
        for _ in 0..3 {
            drop(clients.pop());
            let mut stream = accepted.pop().unwrap();
            let mut buf = [0u8; 1];
            assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        }
        assert_eq!(handle.connections(), 7);

        // The socket is gone: an eleventh connection is refused.
        assert!(TcpStream::connect(addr).await.is_err());

        // Survivors still carry traffic both ways.
        clients[0].write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted[0].read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        accepted[0].write_all(b"pong").await.unwrap();
        clients[0].read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(accepted);
        wait_for_count(&handle, 0).await;
        timeout(Duration::from_secs(5), handle.wait_drained()).await.unwrap();
    }

    #[tokio::test]
    async fn drain_wakes_a_pending_accept() {
        let mut listener = listener().await;
        let handle = listener.handle();

        let pending = tokio::spawn(async move {
            let res = listener.accept().await;
            listener.close();
            res
        });
        tokio::task::yield_now().await;

        handle.drain();
        let res = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
        assert!(res.unwrap().is_none());
        assert_eq!(handle.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn duplicate_only_while_active() {
        let mut listener = listener().await;
        let handle = listener.handle();

        let dup = handle.duplicate().unwrap();
        let std_listener = std::net::TcpListener::from(dup);
        assert_eq!(std_listener.local_addr().unwrap(), listener.local_addr());
        assert_eq!(handle.state(), ListenerState::Active);

        handle.drain();
        assert!(matches!(handle.duplicate(), Err(Error::NotActive)));
        assert!(listener.accept().await.unwrap().is_none());
        listener.close();
        assert!(matches!(handle.duplicate(), Err(Error::NotActive)));
        assert_eq!(handle.connections(), 0);
    }

    #[tokio::test]
    async fn duplicate_keeps_serving_after_original_closes() {
        let mut listener = listener().await;
        let addr = listener.local_addr();
        let dup = listener.handle().duplicate().unwrap();

        listener.handle().drain();
        assert!(listener.accept().await.unwrap().is_none());
        listener.close();

        let mut successor = TrackedListener::from_std(std::net::TcpListener::from(dup)).unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let stream = successor.accept().await.unwrap().unwrap();
        assert_eq!(stream.get_ref().local_addr().unwrap(), addr);
        assert_eq!(successor.handle().connections(), 1);
    }
}
