//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Fixed paths (health
//! probes, the restart endpoint) are registered with [`Router::on`]; the
//! controller/action table is registered in one go with [`Router::mount`].

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

/// The application router. Build it once at startup; pass it to
/// [`Server::serve`](crate::Server::serve).
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    fallback: Option<BoxedHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), fallback: None }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or is already registered for
    /// `method`.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.add(method, path, handler.into_boxed_handler())
    }

    /// Like [`Router::on`], but a path that is invalid or already taken for
    /// `method` is returned as [`Error::Registration`] instead of panicking.
    /// For paths that come from configuration.
    pub fn try_on(self, method: Method, path: &str, handler: impl Handler) -> Result<Self, Error> {
        self.try_add(method, path, handler.into_boxed_handler())
    }

    /// Registers every action of `dispatcher`.
    ///
    /// Each enumerated route is registered at its own path, except the one
    /// equal to `root`, which is registered at `/` instead. A catch-all
    /// `/{controller}/{action}` route and the router fallback both hand the
    /// request to the dispatcher, so every miss gets its not-found response.
    pub fn mount(mut self, dispatcher: Dispatcher, root: Option<&str>) -> Self {
        let dispatcher = Arc::new(dispatcher);

        for route in dispatcher.routes() {
            let path = if root == Some(route.path.as_str()) { "/" } else { route.path.as_str() };
            debug!(path, action = %route.key, "route");

            let slug = route.path.rsplit('/').next().unwrap_or_default().to_owned();
            let handler = dispatch_to(&dispatcher, route.key.controller, slug);
            for method in Method::ACTION {
                self = self.add(method, path, Arc::clone(&handler));
            }
        }

        let catch_all = {
            let dispatcher = Arc::clone(&dispatcher);
            move |req: Request| {
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    let controller = req.param("controller").unwrap_or_default().to_owned();
                    let slug = req.param("action").unwrap_or_default().to_owned();
                    dispatcher.dispatch(&controller, &slug, req).await
                }
            }
        }
        .into_boxed_handler();
        for method in Method::ACTION {
            self = self.add(method, "/{controller}/{action}", Arc::clone(&catch_all));
        }

        let not_found = move |req: Request| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.not_found(req).await }
        };
        self.fallback = Some(not_found.into_boxed_handler());
        self
    }

    fn add(self, method: Method, path: &str, handler: BoxedHandler) -> Self {
        self.try_add(method, path, handler).unwrap_or_else(|e| panic!("{e}"))
    }

    fn try_add(mut self, method: Method, path: &str, handler: BoxedHandler) -> Result<Self, Error> {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .map_err(|e| Error::Registration(format!("invalid route {method} `{path}`: {e}")))?;
        Ok(self)
    }

    pub(crate) fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    /// Routes one request to its handler, the fallback, or a bare `404`.
    pub(crate) async fn route(&self, req: Request) -> Response {
        if let Some((handler, params)) = self.lookup(req.method(), req.path()) {
            return handler.call(req.with_params(params)).await;
        }
        match &self.fallback {
            Some(fallback) => Arc::clone(fallback).call(req).await,
            None => Response::status(StatusCode::NOT_FOUND),
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

fn dispatch_to(dispatcher: &Arc<Dispatcher>, controller: String, slug: String) -> BoxedHandler {
    let dispatcher = Arc::clone(dispatcher);
    let handler = move |req: Request| {
        let dispatcher = Arc::clone(&dispatcher);
        let controller = controller.clone();
        let slug = slug.clone();
        async move { dispatcher.dispatch(&controller, &slug, req).await }
    };
    handler.into_boxed_handler()
}
