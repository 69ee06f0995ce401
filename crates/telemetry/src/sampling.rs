//! Per-event sampling decisions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Uniform random numbers in `[0, 1)`.
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;
}

/// Thread-local generator seeded by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&mut self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic generator for reproducible sampling.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Decides independently for each event whether it is kept.
pub struct Sampler {
    rate: f64,
    source: Mutex<Box<dyn RandomSource>>,
}

impl Sampler {
    /// Create a sampler keeping roughly `rate` of events.
    pub fn new(rate: f64, source: Box<dyn RandomSource>) -> Self {
        Self {
            rate,
            source: Mutex::new(source),
        }
    }

    /// Sampling rate in `[0, 1]`.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// `true` if the next event should be kept.
    ///
    /// A rate of 1 keeps everything and 0 keeps nothing without consuming
    /// randomness; otherwise an event is kept when `random() < rate`.
    pub fn should_sample(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        let mut source = self
            .source
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        source.next_f64() < self.rate
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").field("rate", &self.rate).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Replays a fixed sequence, wrapping around.
    struct Sequence {
        values: Vec<f64>,
        index: usize,
    }

    impl RandomSource for Sequence {
        fn next_f64(&mut self) -> f64 {
            let value = self.values[self.index % self.values.len()];
            self.index += 1;
            value
        }
    }

    fn kept(rate: f64, seed: u64, n: usize) -> usize {
        let sampler = Sampler::new(rate, Box::new(SeededRandom::new(seed)));
        (0..n).filter(|_| sampler.should_sample()).count()
    }

    #[test]
    fn test_rate_one_keeps_all() {
        assert_eq!(kept(1.0, 7, 1_000), 1_000);
    }

    #[test]
    fn test_rate_zero_keeps_none() {
        assert_eq!(kept(0.0, 7, 1_000), 0);
    }

    #[test]
    fn test_strict_less_than_comparison() {
        let sampler = Sampler::new(
            0.5,
            Box::new(Sequence {
                values: vec![0.49, 0.5, 0.51],
                index: 0,
            }),
        );
        assert!(sampler.should_sample());
        assert!(!sampler.should_sample());
        assert!(!sampler.should_sample());
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = SeededRandom::new(42);
        let mut b = SeededRandom::new(42);
        for _ in 0..10 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
    }

    #[test]
    fn test_thread_random_in_range() {
        let mut source = ThreadRandom;
        for _ in 0..100 {
            let v = source.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_retained_fraction_converges(rate in 0.0f64..=1.0, seed in any::<u64>()) {
            let n = 20_000;
            let fraction = kept(rate, seed, n) as f64 / n as f64;
            prop_assert!((fraction - rate).abs() < 0.03, "rate {} kept {}", rate, fraction);
        }
    }
}
