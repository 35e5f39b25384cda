//! Seeded RNG wrapper for reproducible behavior.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe seeded random number generator
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG; `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate` (0.0 never, 1.0 always).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform value in `[0.0, 1.0)`
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().gen()
    }

    /// Uniform value in `[-amplitude, amplitude)`, or zero for a non-positive
    /// amplitude.
    pub fn jitter(&self, amplitude: f64) -> f64 {
        if amplitude > 0.0 {
            self.inner.lock().gen_range(-amplitude..amplitude)
        } else {
            0.0
        }
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_rng_deterministic() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        assert_eq!(a.next_f64(), b.next_f64());
    }

    #[test]
    fn test_should_fail_extremes() {
        let rng = MockRng::new(Some(7));
        assert!((0..100).all(|_| !rng.should_fail(0.0)));
        assert!((0..100).all(|_| rng.should_fail(1.0)));
    }

    #[test]
    fn test_jitter_bounds() {
        let rng = MockRng::new(Some(1));
        for _ in 0..1000 {
            let j = rng.jitter(0.5);
            assert!((-0.5..0.5).contains(&j));
        }
        assert_eq!(rng.jitter(0.0), 0.0);
    }
}
