use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use baton::{Actions, Controller, Request, Response};

use super::base::{escape, Base, HasView, View};
use super::content::{Category, ContentSource, Planet};

/// The public site.
pub struct Public {
    view: View,
    source: Box<dyn ContentSource>,
}

impl Public {
    pub fn new(view: View, source: impl ContentSource) -> Self {
        Self { view, source: Box::new(source) }
    }

    /// A generated planet sheet. Any category can be pinned with a query
    /// parameter named after it, e.g. `?terrain=ocean`.
    async fn index(self: Arc<Self>, req: Request) -> Response {
        let pinned: BTreeMap<_, _> = Category::ALL
            .into_iter()
            .filter_map(|c| req.query(c.key()).filter(|v| !v.is_empty()).map(|v| (c, v.into_owned())))
            .collect();

        match self.source.planet(&pinned) {
            Ok(planet) => self.view.page(&sheet(&planet)),
            Err(e) => {
                tracing::warn!("planet generation failed: {e}");
                self.view.error_page(e)
            }
        }
    }
}

impl HasView for Public {
    fn view(&self) -> &View {
        &self.view
    }
}

impl Controller for Public {
    fn actions(actions: &mut Actions<Self>) {
        Base::declare(actions);
        actions.action("index", Self::index);
    }
}

fn sheet(planet: &Planet) -> String {
    let mut html = String::from("<h1>Planet</h1>\n<table>\n");
    for (category, value) in &planet.categories {
        let _ = writeln!(html, "<tr><th>{category}</th><td>{}</td></tr>", escape(value));
    }
    let _ = writeln!(html, "<tr><th>Hours per day</th><td>{}</td></tr>", planet.hours_per_day);
    let _ = writeln!(html, "<tr><th>Days per year</th><td>{}</td></tr>", planet.days_per_year);
    let _ = writeln!(html, "<tr><th>Population</th><td>{}</td></tr>", planet.population);
    html.push_str("</table>");
    html
}
