//! The action registry.
//!
//! Turns a set of named controllers into an immutable lookup table of
//! `controller → {action name → action}`. Operations the *base* controller
//! declares are plumbing every controller shares; they are subtracted from
//! each controller's set so they can never be routed to, even when a concrete
//! controller re-declares them.
//!
//! The table is built exactly once: [`RegistryBuilder::build`] consumes the
//! builder, and the resulting [`ActionRegistry`] has no mutating methods. It
//! is shared across connection tasks behind an `Arc` and read without locks.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::{Action, Actions, Controller};
use crate::error::Error;

/// Identifies one dispatch target.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ActionKey {
    pub controller: String,
    pub action: String,
}

impl ActionKey {
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self { controller: controller.into(), action: action.into() }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.controller, self.action)
    }
}

/// One registered controller and its dispatchable actions.
pub struct ControllerEntry {
    name: String,
    handle: Arc<dyn Any + Send + Sync>,
    actions: BTreeMap<String, Action>,
}

impl ControllerEntry {
    pub fn name(&self) -> &str { &self.name }

    /// Dispatchable action names, sorted.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Downcasts the controller handle to its concrete type.
    pub fn handle<C: Any>(&self) -> Option<&C> {
        self.handle.downcast_ref()
    }
}

impl fmt::Debug for ControllerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerEntry")
            .field("name", &self.name)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Base used when a registry has no shared plumbing to exclude.
pub struct NoBase;

impl Controller for NoBase {
    fn actions(_: &mut Actions<Self>) {}
}

/// Collects controllers for a one-shot [`ActionRegistry`] build.
pub struct RegistryBuilder {
    base: BTreeSet<String>,
    pending: Vec<Pending>,
}

struct Pending {
    name: String,
    handle: Arc<dyn Any + Send + Sync>,
    declared: Vec<(String, Action)>,
}

impl RegistryBuilder {
    /// Starts a registry whose controllers all share `base`'s operations.
    /// The base's own operation names are computed here, once.
    pub fn new<B: Controller>(base: B) -> Self {
        let base = Actions::collect(Arc::new(base))
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        Self { base, pending: Vec::new() }
    }

    /// Adds a controller under `name`. Names are matched case-sensitively.
    pub fn controller<C: Controller>(mut self, name: &str, controller: C) -> Self {
        let controller = Arc::new(controller);
        let declared = Actions::collect(Arc::clone(&controller));
        self.pending.push(Pending { name: name.to_owned(), handle: controller, declared });
        self
    }

    /// Builds the table.
    ///
    /// Fails on an empty or duplicate controller name, an empty action name,
    /// or an action name declared twice by one controller. A controller left
    /// with no actions after base exclusion is legal.
    pub fn build(self) -> Result<ActionRegistry, Error> {
        let mut controllers = HashMap::with_capacity(self.pending.len());

        for Pending { name, handle, declared } in self.pending {
            if name.is_empty() {
                return Err(Error::Registration("controller name must not be empty".into()));
            }
            if !is_path_segment(&name) {
                return Err(Error::Registration(format!(
                    "controller name `{name}` is not a plain path segment"
                )));
            }
            if controllers.contains_key(&name) {
                return Err(Error::Registration(format!("controller `{name}` registered twice")));
            }

            let mut actions = BTreeMap::new();
            for (action, op) in declared {
                if action.is_empty() {
                    return Err(Error::Registration(format!(
                        "controller `{name}` declares an action with an empty name"
                    )));
                }
                if actions.contains_key(&action) {
                    return Err(Error::Registration(format!(
                        "controller `{name}` declares `{action}` twice"
                    )));
                }
                actions.insert(action, op);
            }

            actions.retain(|action, _| !self.base.contains(action));

            for action in actions.keys().filter(|a| !is_routable(a)) {
                warn!(controller = %name, action = %action, "action name cannot be reached by any slug");
            }
            debug!(controller = %name, actions = actions.len(), "controller registered");

            controllers.insert(name.clone(), ControllerEntry { name, handle, actions });
        }

        Ok(ActionRegistry { controllers })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self { Self::new(NoBase) }
}

/// Immutable `controller → actions` table.
pub struct ActionRegistry {
    controllers: HashMap<String, ControllerEntry>,
}

impl ActionRegistry {
    pub fn builder<B: Controller>(base: B) -> RegistryBuilder {
        RegistryBuilder::new(base)
    }

    pub fn get(&self, controller: &str) -> Option<&ControllerEntry> {
        self.controllers.get(controller)
    }

    /// Resolves a canonical action name.
    pub fn action(&self, controller: &str, action: &str) -> Option<&Action> {
        self.get(controller)?.action(action)
    }

    pub fn contains(&self, key: &ActionKey) -> bool {
        self.action(&key.controller, &key.action).is_some()
    }

    /// Controller names, sorted.
    pub fn controllers(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.controllers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Every registered key, sorted by controller then action.
    pub fn keys(&self) -> Vec<ActionKey> {
        let mut keys: Vec<_> = self.controllers.values()
            .flat_map(|entry| entry.action_names().map(|a| ActionKey::new(&entry.name, a)))
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize { self.controllers.len() }
    pub fn is_empty(&self) -> bool { self.controllers.is_empty() }
}

fn is_path_segment(name: &str) -> bool {
    !name.chars().any(|c| c.is_whitespace() || matches!(c, '/' | '{' | '}' | '?' | '#' | '*'))
}

/// Canonical action names are lowercase snake_case; only those have a slug.
fn is_routable(action: &str) -> bool {
    action.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
