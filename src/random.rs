//! Seeded random source
//!
//! All randomness in the crate flows through an explicitly passed
//! [`RandomSource`]; there is no process-wide generator.

use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Odd 64-bit constant used to spread per-sample seeds apart.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic pseudo-random generator owned by one pipeline invocation
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed for sample `index` of a batch started from `base_seed`
    ///
    /// The result depends only on the two arguments, never on scheduling.
    pub fn derive(base_seed: u64, index: u64) -> Self {
        Self::from_seed(base_seed ^ index.wrapping_add(1).wrapping_mul(SEED_STRIDE))
    }

    /// Draw uniformly from the closed interval `[min, max]`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if a bound is not finite or `min > max`.
    pub fn uniform(&mut self, min: f64, max: f64) -> Result<f64> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(Error::InvalidParameter(format!("Invalid range [{}, {}]", min, max)));
        }
        if min == max {
            return Ok(min);
        }
        Ok(self.rng.gen_range(min..=max))
    }

    /// Draw an index uniformly from `0..len`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `len` is zero.
    pub fn index(&mut self, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(Error::InvalidParameter("Cannot draw an index from an empty range".into()));
        }
        Ok(self.rng.gen_range(0..len))
    }
}
