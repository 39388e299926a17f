//! Zero-downtime restart coordination.
//!
//! A restart is a two-phase handoff:
//!
//! 1. **Launch.** Duplicate the listening socket and give it to a successor
//!    through a [`SocketHandoff`] backend. If this fails nothing has changed:
//!    the current process keeps serving and the caller gets the error.
//! 2. **Acknowledge.** Wait for the successor to report that its listener is
//!    live. Only then is this process's listener drained. A successor that
//!    dies before acknowledging is logged and forgotten; this process never
//!    stops serving on its account.
//!
//! The coordinator is the only party that drains the listener in response to
//! a restart. How the successor is started and how it acknowledges is the
//! backend's business: [`ExecHandoff`](crate::handoff::ExecHandoff) re-executes
//! the current binary, but a supervisor or socket-activation backend plugs
//! into the same seam.

use std::future::Future;
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::StatusCode;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::handler::Handler;
use crate::listener::ListenerHandle;
use crate::request::Request;
use crate::response::Response;

type ReadyFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'static>>;

/// A launched successor that has not yet acknowledged readiness.
pub struct Successor {
    pid: Option<u32>,
    ready: ReadyFuture,
}

impl Successor {
    /// `ready` resolves `Ok` once the successor is accepting on the handed-off
    /// socket, or `Err` if it can no longer get there.
    pub fn new(
        pid: Option<u32>,
        ready: impl Future<Output = Result<(), Error>> + Send + 'static,
    ) -> Self {
        Self { pid, ready: Box::pin(ready) }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn ready(self) -> Result<(), Error> {
        self.ready.await
    }
}

/// Moves a listening socket into a new server instance.
pub trait SocketHandoff: Send + Sync + 'static {
    /// Starts a successor that owns `listener`. Returns as soon as the
    /// successor exists; readiness is reported through [`Successor::ready`].
    ///
    /// `listener` is a duplicate. Dropping it never affects the caller's own
    /// socket.
    fn launch(&self, listener: OwnedFd) -> Result<Successor, Error>;
}

/// Drives restarts for one listener.
pub struct RestartCoordinator {
    listener: ListenerHandle,
    handoff: Box<dyn SocketHandoff>,
    pending: AtomicBool,
}

impl RestartCoordinator {
    pub fn new(listener: ListenerHandle, handoff: impl SocketHandoff) -> Arc<Self> {
        Arc::new(Self { listener, handoff: Box::new(handoff), pending: AtomicBool::new(false) })
    }

    /// Launches a successor and schedules the drain for when it is ready.
    /// Returns the successor's pid, when the backend knows it.
    ///
    /// Rejected with [`Error::NotActive`] once the listener is draining, and
    /// with [`Error::RestartInProgress`] while an earlier successor has not
    /// yet answered. Neither rejection changes any state.
    pub fn trigger(self: &Arc<Self>) -> Result<Option<u32>, Error> {
        if !self.listener.is_active() {
            return Err(Error::NotActive);
        }
        if self.pending.swap(true, Ordering::AcqRel) {
            return Err(Error::RestartInProgress);
        }

        let successor = match self.listener.duplicate().and_then(|fd| self.handoff.launch(fd)) {
            Ok(successor) => successor,
            Err(e) => {
                self.pending.store(false, Ordering::Release);
                error!(pid = std::process::id(), "restart: {e}");
                return Err(e);
            }
        };

        let successor_pid = successor.pid();
        info!(pid = std::process::id(), successor = ?successor_pid, "restart: successor launched");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match successor.ready().await {
                Ok(()) => {
                    info!(
                        pid = std::process::id(),
                        successor = ?successor_pid,
                        connections = this.listener.connections(),
                        "restart: successor ready, draining",
                    );
                    this.listener.drain();
                }
                Err(e) => {
                    warn!(pid = std::process::id(), successor = ?successor_pid, "restart abandoned, still serving: {e}");
                    this.pending.store(false, Ordering::Release);
                }
            }
        });

        Ok(successor_pid)
    }
}

/// The administrative restart endpoint.
///
/// `202` once a successor is launched, `409` when a restart cannot start in
/// the current state, `500` when launching failed.
pub fn endpoint(coordinator: Arc<RestartCoordinator>) -> impl Handler {
    move |_req: Request| {
        let coordinator = Arc::clone(&coordinator);
        async move {
            match coordinator.trigger() {
                Ok(pid) => {
                    let body = match pid {
                        Some(pid) => format!("restarting: successor pid {pid}"),
                        None => "restarting".to_owned(),
                    };
                    Response::builder().status(StatusCode::ACCEPTED).text(body)
                }
                Err(e @ (Error::NotActive | Error::RestartInProgress)) => {
                    Response::builder().status(StatusCode::CONFLICT).text(e.to_string())
                }
                Err(e) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .text(e.to_string()),
            }
        }
    }
}
