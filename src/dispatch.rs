//! Request dispatch: `/{controller}/{action-slug}` → one registered action.
//!
//! Slugs are lowercase, hyphen-separated tokens (`star-map`). Canonical
//! action names are the same words joined with underscores (`star_map`), so
//! the transliteration is a single character swap in each direction and
//! every canonical name has exactly one slug.
//!
//! A miss, whether the controller or the action is unknown, goes to the
//! not-found handler. The two cases are indistinguishable to the client.

use std::sync::Arc;

use http::StatusCode;
use tracing::debug;

use crate::action::Action;
use crate::handler::{BoxedHandler, Handler};
use crate::registry::{ActionKey, ActionRegistry};
use crate::request::Request;
use crate::response::Response;

/// Body of the built-in not-found response.
pub const NOT_FOUND_BODY: &str = "Error 404 - Could not find the requested page";

/// A routable path and the action it reaches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub path: String,
    pub key: ActionKey,
}

/// Routes requests to registered actions.
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    not_found: BoxedHandler,
}

impl Dispatcher {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            not_found: default_not_found.into_boxed_handler(),
        }
    }

    /// Replaces the not-found handler.
    pub fn with_not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = handler.into_boxed_handler();
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Looks up the action a `(controller, slug)` pair reaches, if any.
    pub fn resolve(&self, controller: &str, slug: &str) -> Option<&Action> {
        let action = canonical_action(slug)?;
        self.registry.action(controller, &action)
    }

    /// Invokes exactly one action, or the not-found handler, and returns its
    /// response. The action runs to completion on the caller's task.
    pub async fn dispatch(&self, controller: &str, slug: &str, req: Request) -> Response {
        match self.resolve(controller, slug) {
            Some(action) => {
                debug!(controller, action = slug, "dispatch");
                let action = Arc::clone(action);
                action.call(req).await
            }
            None => {
                debug!(controller, action = slug, "no such action");
                self.not_found(req).await
            }
        }
    }

    /// Runs the not-found handler directly.
    pub async fn not_found(&self, req: Request) -> Response {
        let handler = Arc::clone(&self.not_found);
        handler.call(req).await
    }

    /// The externally routable path of every registered action, sorted.
    ///
    /// Actions whose name no slug converts back to (`StarMap`, `star-map`)
    /// are registered but cannot be dispatched, so they are left out.
    pub fn routes(&self) -> Vec<Route> {
        self.registry.keys()
            .into_iter()
            .filter_map(|key| {
                let slug = route_slug(&key.action);
                (canonical_action(&slug).as_deref() == Some(key.action.as_str()))
                    .then(|| Route { path: format!("/{}/{slug}", key.controller), key })
            })
            .collect()
    }

    /// One line per route: `"/public/star-map", public.star_map`.
    pub fn action_map(&self) -> String {
        self.routes()
            .iter()
            .map(|route| format!("\"{}\", {}", route.path, route.key))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Converts a slug to its canonical action name.
///
/// Returns `None` for anything that is not a lowercase hyphenated token, so
/// `star_map` or `Star-Map` never alias `star-map`.
pub fn canonical_action(slug: &str) -> Option<String> {
    let valid = !slug.is_empty()
        && slug.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    valid.then(|| slug.replace('-', "_"))
}

/// Converts a canonical action name to its slug.
pub fn route_slug(action: &str) -> String {
    action.replace('_', "-")
}

/// The fallback not-found handler: a fixed body and `500`.
pub async fn default_not_found(_req: Request) -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .text(NOT_FOUND_BODY)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::action::{Actions, Controller};
    use crate::method::Method;
    use crate::registry::RegistryBuilder;

    #[derive(Default)]
    struct Public {
        index_calls: AtomicUsize,
        star_map_calls: AtomicUsize,
    }

    impl Controller for Public {
        fn actions(actions: &mut Actions<Self>) {
            actions
                .action("index", Self::index)
                .action("star_map", Self::star_map);
        }
    }

    impl Public {
        async fn index(self: Arc<Self>, _req: Request) -> Response {
            self.index_calls.fetch_add(1, Ordering::SeqCst);
            Response::html("<h1>index</h1>")
        }

        async fn star_map(self: Arc<Self>, _req: Request) -> Response {
            self.star_map_calls.fetch_add(1, Ordering::SeqCst);
            Response::html("<h1>stars</h1>")
        }
    }

    fn dispatcher() -> Dispatcher {
        let registry = RegistryBuilder::default()
            .controller("public", Public::default())
            .build()
            .unwrap();
        Dispatcher::new(registry)
    }

    fn public(d: &Dispatcher) -> &Public {
        d.registry().get("public").unwrap().handle::<Public>().unwrap()
    }

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path)
    }

    #[test]
    fn slug_transliteration() {
        assert_eq!(canonical_action("index").as_deref(), Some("index"));
        assert_eq!(canonical_action("star-map").as_deref(), Some("star_map"));
        assert_eq!(canonical_action("sector-7-g").as_deref(), Some("sector_7_g"));
        assert_eq!(canonical_action(""), None);
        assert_eq!(canonical_action("star_map"), None);
        assert_eq!(canonical_action("Star-Map"), None);
        assert_eq!(route_slug("star_map"), "star-map");
    }

    #[tokio::test]
    async fn hit_invokes_exactly_that_action_once() {
        let d = dispatcher();

        let resp = d.dispatch("public", "index", get("/public/index")).await;

        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(resp.body(), b"<h1>index</h1>");
        assert_eq!(public(&d).index_calls.load(Ordering::SeqCst), 1);
        assert_eq!(public(&d).star_map_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_route_reaches_its_action() {
        let d = dispatcher();

        for route in d.routes() {
            let slug = route.path.rsplit('/').next().unwrap().to_owned();
            d.dispatch(&route.key.controller, &slug, get(&route.path)).await;
        }

        assert_eq!(public(&d).index_calls.load(Ordering::SeqCst), 1);
        assert_eq!(public(&d).star_map_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let d = dispatcher();

        let resp = d.dispatch("public", "missing", get("/public/missing")).await;

        assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.body(), NOT_FOUND_BODY.as_bytes());
        assert_eq!(public(&d).index_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_controller_is_not_found() {
        let d = dispatcher();
        let resp = d.dispatch("private", "index", get("/private/index")).await;
        assert_eq!(resp.body(), NOT_FOUND_BODY.as_bytes());
        assert_eq!(public(&d).index_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_canonical_slug_is_not_found() {
        let d = dispatcher();
        d.dispatch("public", "star_map", get("/public/star_map")).await;
        d.dispatch("public", "Index", get("/public/Index")).await;
        assert_eq!(public(&d).star_map_calls.load(Ordering::SeqCst), 0);
        assert_eq!(public(&d).index_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn custom_not_found_handler() {
        let d = dispatcher().with_not_found(|req: Request| async move {
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .text(format!("nothing at {}", req.path()))
        });

        let resp = d.dispatch("public", "nope", get("/public/nope")).await;

        assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(resp.body(), b"nothing at /public/nope");
    }

    #[test]
    fn routes_and_action_map() {
        let d = dispatcher();

        let paths: Vec<_> = d.routes().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, ["/public/index", "/public/star-map"]);
        assert_eq!(
            d.action_map(),
            "\"/public/index\", public.index\n\"/public/star-map\", public.star_map"
        );
    }

    struct Legacy;

    impl Controller for Legacy {
        fn actions(actions: &mut Actions<Self>) {
            actions
                .action("index", |_: Arc<Self>, _req| async { "index" })
                .action("StarMap", |_: Arc<Self>, _req| async { "unreachable" })
                .action("star-map", |_: Arc<Self>, _req| async { "unreachable" });
        }
    }

    #[tokio::test]
    async fn unreachable_names_are_not_listed() {
        let registry = RegistryBuilder::default().controller("legacy", Legacy).build().unwrap();
        assert!(registry.contains(&ActionKey::new("legacy", "StarMap")));
        let d = Dispatcher::new(registry);

        let paths: Vec<_> = d.routes().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, ["/legacy/index"]);
        assert_eq!(d.action_map(), "\"/legacy/index\", legacy.index");

        let resp = d.dispatch("legacy", "star-map", get("/legacy/star-map")).await;
        assert_eq!(resp.body(), NOT_FOUND_BODY.as_bytes());
    }
}
