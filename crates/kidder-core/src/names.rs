//! Display name allocation.
//!
//! Uniqueness is best effort: the name is checked against the registry and
//! registered later, so two sessions racing for the same name can both win.

use crate::registry::Registry;
use rand::Rng;

/// Prefix for synthesized names.
pub const DEFAULT_PREFIX: &str = "Kidder";

/// Number of random digits appended to a name.
const SUFFIX_DIGITS: usize = 3;

/// Hands out display names to new sessions.
#[derive(Debug, Clone)]
pub struct NameAllocator {
    prefix: String,
}

impl NameAllocator {
    /// Create an allocator synthesizing names with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Prefix used for synthesized names.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Pick a display name.
    #[must_use]
    pub fn allocate(&self, requested: Option<&str>, registry: &Registry) -> String {
        self.allocate_with(requested, registry, &mut rand::rng())
    }

    /// Pick a display name using the given random source.
    pub fn allocate_with<R: Rng>(
        &self,
        requested: Option<&str>,
        registry: &Registry,
        rng: &mut R,
    ) -> String {
        match requested.filter(|name| !name.trim().is_empty()) {
            None => format!("{}{}", self.prefix, random_digits(rng)),
            Some(name) if !registry.contains_name(name) => name.to_string(),
            Some(name) => format!("{}{}", name, random_digits(rng)),
        }
    }
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

fn random_digits<R: Rng>(rng: &mut R) -> String {
    (0..SUFFIX_DIGITS)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}
