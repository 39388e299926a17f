//! Built-in health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? |
//! | **Readiness** | `/readyz` | Should new traffic come here? |
//!
//! During a restart the old instance keeps answering liveness but reports
//! not-ready as soon as its listener starts draining, so a load balancer can
//! stop routing to it before its in-flight connections finish.

use http::StatusCode;

use crate::handler::Handler;
use crate::listener::{ListenerHandle, ListenerState};
use crate::{Request, Response};

/// Liveness probe. Always `200 OK` with body `"ok"`.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Readiness probe bound to a listener: `200 ready` while it is accepting,
/// `503 draining` afterwards.
pub fn readiness(listener: ListenerHandle) -> impl Handler {
    move |_req: Request| {
        let state = listener.state();
        async move {
            match state {
                ListenerState::Active => Response::text("ready"),
                ListenerState::Draining | ListenerState::Closed => Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .text("draining"),
            }
        }
    }
}
