//! Site controllers served by the `baton` binary.

mod base;
mod content;
mod public;

pub use base::{Base, View};
pub use content::Generator;
pub use public::Public;
