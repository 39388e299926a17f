//! Plumbing every site controller carries.
//!
//! Each controller holds a [`View`] and declares the view operations through
//! [`Base::declare`]. Registering [`Base`] as the registry base removes those
//! operations from every controller's routable set again.

use std::fmt::Display;
use std::sync::Arc;

use baton::{Actions, Controller, Request, Response};
use http::StatusCode;

/// Page chrome shared by all controllers.
#[derive(Clone, Debug)]
pub struct View {
    title: Arc<str>,
}

impl View {
    pub fn new(title: &str) -> Self {
        Self { title: title.into() }
    }

    /// Wraps `body` (already escaped HTML) in the site layout.
    pub fn page(&self, body: &str) -> Response {
        Response::html(self.layout(body))
    }

    /// The error page, with `500`.
    pub fn error_page(&self, err: impl Display) -> Response {
        let body = format!(
            "<h1>Something went wrong</h1>\n<p class=\"error\">{}</p>",
            escape(&err.to_string())
        );
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .html(self.layout(&body))
    }

    pub fn redirect(&self, location: &str) -> Response {
        Response::builder()
            .status(StatusCode::SEE_OTHER)
            .header("location", location)
            .no_body()
    }

    fn layout(&self, body: &str) -> String {
        let title = escape(&self.title);
        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
             <body>\n{body}\n</body>\n</html>\n"
        )
    }
}

/// A controller with a [`View`].
pub trait HasView {
    fn view(&self) -> &View;
}

/// The registry base: a controller with nothing but the shared plumbing.
pub struct Base {
    view: View,
}

impl Base {
    pub fn new(view: View) -> Self {
        Self { view }
    }

    /// Declares the plumbing operations on any controller with a view.
    pub fn declare<C: HasView + Controller>(actions: &mut Actions<C>) {
        actions
            .action("render", |c: Arc<C>, _req: Request| async move { c.view().page("") })
            .action("redirect", |c: Arc<C>, req: Request| async move {
                let to = req.query("to").map_or_else(|| "/".to_owned(), |to| to.into_owned());
                c.view().redirect(&to)
            });
    }
}

impl HasView for Base {
    fn view(&self) -> &View {
        &self.view
    }
}

impl Controller for Base {
    fn actions(actions: &mut Actions<Self>) {
        Self::declare(actions);
    }
}

pub(crate) fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
