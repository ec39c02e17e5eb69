//! Sampling decisions for measurements.

use std::cell::UnsafeCell;

use rand::{rngs::OsRng, Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

thread_local! {
    static SAMPLE_RNG: UnsafeCell<Xoshiro256StarStar> = {
        UnsafeCell::new(Xoshiro256StarStar::try_from_rng(&mut OsRng).unwrap())
    };
}

fn uniform_draw() -> f64 {
    SAMPLE_RNG.with(|rng| {
        // SAFETY: We know it's safe to take a mutable reference since we're getting a pointer to
        // a thread-local value, and the reference never outlives the closure executing on this
        // thread.
        let rng = unsafe { &mut *rng.get() };
        rng.random::<f64>()
    })
}

/// Decides whether a measurement taken at the given sample rate is kept.
///
/// Rates at or above 1 always keep the measurement, and rates at or below zero never do. Rates
/// in between keep the measurement with probability equal to the rate, using one independent
/// uniform draw per call. A NaN rate fails the draw and is treated as always-drop.
pub(crate) fn sample(rate: f64) -> bool {
    if rate >= 1.0 {
        true
    } else if rate <= 0.0 {
        false
    } else {
        uniform_draw() <= rate
    }
}

#[cfg(test)]
mod tests {
    use super::sample;

    #[test]
    fn rates_at_or_above_one_always_keep() {
        for _ in 0..1000 {
            assert!(sample(1.0));
            assert!(sample(1.5));
        }
    }

    #[test]
    fn rates_at_or_below_zero_never_keep() {
        for _ in 0..1000 {
            assert!(!sample(0.0));
            assert!(!sample(-1.0));
        }

        assert!(!sample(f64::NAN));
    }

    #[test]
    fn mid_rates_keep_a_plausible_fraction() {
        let trials = 20_000;
        let kept = (0..trials).filter(|_| sample(0.5)).count();

        // Binomial(20000, 0.5) lands outside this window with vanishing probability.
        assert!(kept > trials * 2 / 5, "kept {kept} of {trials}");
        assert!(kept < trials * 3 / 5, "kept {kept} of {trials}");
    }
}
