//! Controllers and their declared actions.
//!
//! A controller is any `Send + Sync` value that lists its routable operations
//! in [`Controller::actions`]. There is no runtime type inspection: the list
//! a controller declares is the list the registry sees.
//!
//! ```rust
//! use std::sync::Arc;
//! use baton::{Actions, Controller, Request, Response};
//!
//! struct Public;
//!
//! impl Controller for Public {
//!     fn actions(actions: &mut Actions<Self>) {
//!         actions
//!             .action("index", Self::index)
//!             .action("star_map", Self::star_map);
//!     }
//! }
//!
//! impl Public {
//!     async fn index(self: Arc<Self>, _req: Request) -> Response {
//!         Response::html("<h1>index</h1>")
//!     }
//!
//!     async fn star_map(self: Arc<Self>, _req: Request) -> Response {
//!         Response::html("<h1>stars</h1>")
//!     }
//! }
//! ```
//!
//! Each declared action is bound to a shared `Arc` of its controller and
//! erased to the same [`BoxedHandler`] shape the router uses for plain
//! handlers, so a dispatch costs one `Arc` clone and one virtual call.

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::IntoResponse;

/// A resolved, invocable action: the controller handle plus the operation.
pub type Action = BoxedHandler;

/// A named group of routable operations.
pub trait Controller: Send + Sync + 'static {
    /// Declares this controller's operations, in any order.
    fn actions(actions: &mut Actions<Self>)
    where
        Self: Sized;
}

/// Declaration table passed to [`Controller::actions`].
pub struct Actions<C> {
    controller: Arc<C>,
    declared: Vec<(String, Action)>,
}

impl<C: Controller> Actions<C> {
    /// Runs `C::actions` against `controller` and returns what it declared,
    /// in declaration order.
    pub(crate) fn collect(controller: Arc<C>) -> Vec<(String, Action)> {
        let mut actions = Actions { controller, declared: Vec::new() };
        C::actions(&mut actions);
        actions.declared
    }

    /// Declares one operation under `name`. The name is kept verbatim.
    pub fn action<F, Fut, R>(&mut self, name: &str, op: F) -> &mut Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + Send + 'static,
    {
        let bound = BoundAction { controller: Arc::clone(&self.controller), op };
        self.declared.push((name.to_owned(), Arc::new(bound)));
        self
    }

    /// The controller these declarations bind to.
    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }
}

struct BoundAction<C, F> {
    controller: Arc<C>,
    op: F,
}

impl<C, F, Fut, R> ErasedHandler for BoundAction<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.op)(Arc::clone(&self.controller), req);
        Box::pin(async move { fut.await.into_response() })
    }
}
