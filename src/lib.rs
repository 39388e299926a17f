//! # baton
//!
//! A controller/action HTTP server that restarts without dropping a
//! connection.
//!
//! ## The contract
//!
//! Requests to `/{controller}/{action-slug}` reach exactly one method of one
//! registered controller. The listening socket survives restarts: a running
//! instance hands a duplicate of it to a successor, waits for the successor
//! to report ready, then stops accepting and finishes what it already has.
//! The port never closes and no accepted connection is cut off.
//!
//! - Routing: explicit action tables, radix-tree lookup via [`matchit`]
//! - Async I/O: tokio + hyper, HTTP/1.1 and HTTP/2
//! - Restart: descriptor handoff with a readiness acknowledgment
//! - Drain: SIGTERM / Ctrl-C or a ready successor; waits for open connections
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use baton::handoff::ExecHandoff;
//! use baton::{
//!     Actions, Controller, Dispatcher, Method, Request, Response, RestartCoordinator,
//!     Router, Server, TrackedListener, health, registry::NoBase, restart,
//! };
//!
//! struct Public;
//!
//! impl Controller for Public {
//!     fn actions(actions: &mut Actions<Self>) {
//!         actions.action("star_map", Self::star_map);
//!     }
//! }
//!
//! impl Public {
//!     async fn star_map(self: Arc<Self>, _req: Request) -> Response {
//!         Response::html("<h1>stars</h1>")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), baton::Error> {
//!     let registry = baton::ActionRegistry::builder(NoBase)
//!         .controller("public", Public)
//!         .build()?;
//!
//!     let server = Server::new(TrackedListener::bind("0.0.0.0:8080").await?);
//!     let restarts = RestartCoordinator::new(
//!         server.handle(),
//!         ExecHandoff::current_exe(["--inherit"])?,
//!     );
//!
//!     let app = Router::new()
//!         .mount(Dispatcher::new(registry), Some("/public/star-map"))
//!         .on(Method::Get,  "/healthz", health::liveness)
//!         .on(Method::Get,  "/readyz",  health::readiness(server.handle()))
//!         .on(Method::Post, "/upgrade", restart::endpoint(restarts));
//!
//!     server.serve(app).await
//! }
//! ```

mod action;
mod dispatch;
mod error;
mod handler;
mod listener;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod handoff;
pub mod health;
pub mod registry;
pub mod restart;

pub use action::{Action, Actions, Controller};
pub use dispatch::{
    canonical_action, default_not_found, route_slug, Dispatcher, Route, NOT_FOUND_BODY,
};
pub use error::Error;
pub use handler::Handler;
pub use listener::{
    ConnectionCounter, ConnectionGuard, ListenerHandle, ListenerState, TrackedListener,
    TrackedStream,
};
pub use method::Method;
pub use registry::{ActionKey, ActionRegistry, ControllerEntry, RegistryBuilder};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use restart::{RestartCoordinator, SocketHandoff, Successor};
pub use router::Router;
pub use server::{Server, DEFAULT_HEADER_READ_TIMEOUT};
