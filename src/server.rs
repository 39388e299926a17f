//! HTTP server and drain.
//!
//! The server owns a [`TrackedListener`] and runs one task per accepted
//! connection. It stops accepting when the listener is drained, which
//! happens on SIGTERM / Ctrl-C or when a restart's successor reports ready.
//! It then:
//!
//! 1. closes the listening socket (a successor, if any, keeps its own copy
//!    and goes on accepting);
//! 2. lets every open connection run until its peer or the header-read
//!    timeout ends it;
//! 3. returns from [`Server::serve`] once the connection count is zero.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::listener::{ListenerHandle, TrackedListener};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// Default bound on how long a connection may sit without sending a full
/// request head. Also ends idle keep-alive connections while draining.
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// The HTTP server.
pub struct Server {
    listener: TrackedListener,
    header_read_timeout: Duration,
    drain_on_signal: bool,
}

impl Server {
    pub fn new(listener: TrackedListener) -> Self {
        Self {
            listener,
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
            drain_on_signal: true,
        }
    }

    pub fn header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Whether SIGTERM / Ctrl-C drain the listener. On by default.
    pub fn drain_on_signal(mut self, enabled: bool) -> Self {
        self.drain_on_signal = enabled;
        self
    }

    pub fn handle(&self) -> ListenerHandle {
        self.listener.handle()
    }

    /// Accepts connections and dispatches them through `router` until the
    /// listener drains, then waits for open connections to finish.
    ///
    /// An accept failure outside a drain is returned at once, abandoning open
    /// connections: the listening socket is considered unusable.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let Self { mut listener, header_read_timeout, drain_on_signal } = self;
        let handle = listener.handle();
        let router = Arc::new(router);

        info!(pid = std::process::id(), addr = %handle.local_addr(), "baton listening");

        if drain_on_signal {
            let handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!(pid = std::process::id(), "shutdown signal received");
                handle.drain();
            });
        }

        let mut tasks = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                res = listener.accept() => {
                    let stream = match res {
                        Ok(Some(stream)) => stream,
                        Ok(None) => break Ok(()),
                        Err(e) => {
                            error!(pid = std::process::id(), "accept failed: {e}");
                            break Err(e);
                        }
                    };

                    let peer = stream.peer_addr();
                    let router = Arc::clone(&router);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move { dispatch(router, req, peer).await }
                        });

                        let mut builder = ConnBuilder::new(TokioExecutor::new());
                        builder
                            .http1()
                            .timer(TokioTimer::new())
                            .header_read_timeout(header_read_timeout);

                        if let Err(e) = builder.serve_connection(io, svc).await {
                            debug!(%peer, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };

        listener.close();
        // A broken listener is fatal; dropping the JoinSet aborts the rest.
        outcome?;

        info!(
            pid = std::process::id(),
            connections = handle.connections(),
            "waiting for open connections",
        );

        while tasks.join_next().await.is_some() {}
        handle.counter().wait_zero().await;

        info!(pid = std::process::id(), "baton stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Routes one request and produces one response. Every failure becomes a
/// response, so hyper never sees an error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<hyper::body::Incoming>,
    peer: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    debug!(method = %req.method(), path = %req.uri().path(), %peer, "request");

    let Ok(method) = Method::try_from(req.method()) else {
        return Ok(Response::status(StatusCode::METHOD_NOT_ALLOWED).into_inner());
    };

    let response = match Request::from_hyper(req, method, peer).await {
        Ok(req) => router.route(req).await,
        Err(e) => {
            debug!(%peer, "reading request body: {e}");
            Response::status(StatusCode::BAD_REQUEST)
        }
    };

    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT. If a handler cannot be
/// installed that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
