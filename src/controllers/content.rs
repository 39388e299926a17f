//! The planet generator behind the `public` controller.
//!
//! [`ContentSource`] is the boundary: the controller asks for one planet,
//! optionally pinning some categories, and renders whatever comes back.
//! [`Generator`] is the built-in source, drawing each category from a fixed
//! table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// One aspect of a generated planet.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Category {
    Function,
    Government,
    Type,
    Terrain,
    Temperature,
    Gravity,
    Atmosphere,
    Hydrosphere,
    Starport,
    TechLevel,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Function,
        Category::Government,
        Category::Type,
        Category::Terrain,
        Category::Temperature,
        Category::Gravity,
        Category::Atmosphere,
        Category::Hydrosphere,
        Category::Starport,
        Category::TechLevel,
    ];

    /// Query-string key that pins this category.
    pub fn key(self) -> &'static str {
        match self {
            Category::Function => "function",
            Category::Government => "government",
            Category::Type => "type",
            Category::Terrain => "terrain",
            Category::Temperature => "temperature",
            Category::Gravity => "gravity",
            Category::Atmosphere => "atmosphere",
            Category::Hydrosphere => "hydrosphere",
            Category::Starport => "starport",
            Category::TechLevel => "tech-level",
        }
    }

    fn table(self) -> &'static [&'static str] {
        match self {
            Category::Function => &["Agriculture", "Mining", "Trade hub", "Research", "Military", "Colony"],
            Category::Government => &["Democracy", "Imperial governor", "Corporate", "Tribal", "Anarchy"],
            Category::Type => &["Terrestrial", "Gas giant", "Asteroid", "Moon", "Artificial"],
            Category::Terrain => &["Desert", "Forest", "Jungle", "Mountains", "Ocean", "Tundra", "Urban", "Volcanic"],
            Category::Temperature => &["Frigid", "Cold", "Temperate", "Hot", "Searing"],
            Category::Gravity => &["Light", "Standard", "Heavy"],
            Category::Atmosphere => &["None", "Thin", "Breathable", "Dense", "Toxic"],
            Category::Hydrosphere => &["Arid", "Dry", "Moderate", "Moist", "Saturated"],
            Category::Starport => &["None", "Landing field", "Limited services", "Standard", "Stellar"],
            Category::TechLevel => &["Stone", "Feudal", "Industrial", "Atomic", "Space", "Hyperspace"],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::TechLevel => f.write_str("Tech Level"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// A generated planet sheet.
#[derive(Clone, Debug)]
pub struct Planet {
    pub categories: BTreeMap<Category, String>,
    pub hours_per_day: u32,
    pub days_per_year: u32,
    pub population: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("`{value}` is not a known {category} value")]
    UnknownValue { category: Category, value: String },
}

/// Produces planet sheets.
pub trait ContentSource: Send + Sync + 'static {
    /// Generates one planet. Categories present in `pinned` keep the given
    /// value; the rest are chosen by the source.
    fn planet(&self, pinned: &BTreeMap<Category, String>) -> Result<Planet, ContentError>;
}

/// Table-driven source with a xorshift state per instance.
pub struct Generator {
    state: AtomicU64,
}

impl Generator {
    pub fn with_seed(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self { state: AtomicU64::new(seed | 1) }
    }

    fn next(&self) -> u64 {
        let mut x = self.state.load(Ordering::Relaxed);
        loop {
            let mut n = x;
            n ^= n << 13;
            n ^= n >> 7;
            n ^= n << 17;
            match self.state.compare_exchange_weak(x, n, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return n,
                Err(seen) => x = seen,
            }
        }
    }

    fn below(&self, bound: u64) -> u64 {
        self.next() % bound
    }
}

impl Default for Generator {
    fn default() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15);
        Self::with_seed(seed)
    }
}

impl ContentSource for Generator {
    fn planet(&self, pinned: &BTreeMap<Category, String>) -> Result<Planet, ContentError> {
        let mut categories = BTreeMap::new();
        for category in Category::ALL {
            let table = category.table();
            let value = match pinned.get(&category) {
                Some(value) => table
                    .iter()
                    .copied()
                    .find(|known| known.eq_ignore_ascii_case(value))
                    .ok_or_else(|| ContentError::UnknownValue { category, value: value.clone() })?,
                None => table[self.below(table.len() as u64) as usize],
            };
            categories.insert(category, value.to_owned());
        }

        Ok(Planet {
            categories,
            hours_per_day: 16 + self.below(24) as u32,
            days_per_year: 200 + self.below(400) as u32,
            population: 1_000 * (1 + self.below(10_000_000)),
        })
    }
}
