//! Seed management for reproducible simulations.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Simulation seed; every random choice in a run derives from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSeed {
    /// Base seed value
    pub seed: u64,
    /// Namespace mixed into derived seeds
    pub namespace: String,
}

impl SimSeed {
    /// Create a seed from a literal value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self {
            seed,
            namespace: String::new(),
        }
    }

    /// Create a seed by hashing a name
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(name.as_bytes());
        Self::from_literal(hasher.finish())
    }

    /// Set namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Derive an independent seed for one context, such as one member
    #[must_use]
    pub fn derive(&self, context: &str) -> Self {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write_u64(self.seed);
        hasher.write(self.namespace.as_bytes());
        hasher.write(context.as_bytes());
        Self {
            seed: hasher.finish(),
            namespace: self.namespace.clone(),
        }
    }

    /// RNG seeded from this seed
    #[must_use]
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self::from_literal(42)
    }
}
