//! Variation operators: sampling, differential evolution and polynomial
//! mutation over bounded real vectors.

use rand::prelude::*;

/// Derive the seed of one generation from the run seed.
///
/// SplitMix64 finalizer over `seed ^ generation`, so consecutive
/// generations get unrelated streams.
pub fn generation_seed(seed: u64, generation: u64) -> u64 {
    let mut z = seed ^ generation.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Random number generator wrapper for variation operators.
pub struct VariationRng {
    rng: StdRng,
}

impl VariationRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator for one generation of a seeded run.
    pub fn for_generation(seed: u64, generation: u64) -> Self {
        Self::new(generation_seed(seed, generation))
    }

    /// Uniform sample in `[lo, hi)`; degenerate bounds return `lo`.
    pub fn uniform(&mut self, (lo, hi): (f64, f64)) -> f64 {
        if hi > lo { self.rng.gen_range(lo..hi) } else { lo }
    }

    /// Uniform random vector within bounds.
    pub fn random_vector(&mut self, bounds: &[(f64, f64)]) -> Vec<f64> {
        bounds.iter().map(|&b| self.uniform(b)).collect()
    }

    /// `true` with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.r#gen::<f64>() < p
    }

    /// Random index below `n`.
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Two distinct members of `pool`. A pool with a single member yields it
    /// twice.
    pub fn pick_parents(&mut self, pool: &[usize]) -> (usize, usize) {
        match pool.len() {
            0 => (0, 0),
            1 => (pool[0], pool[0]),
            n => {
                let a = self.index(n);
                let mut b = self.index(n - 1);
                if b >= a {
                    b += 1;
                }
                (pool[a], pool[b])
            }
        }
    }

    /// Differential evolution child `target + f * (r1 - r2)`.
    ///
    /// Each coordinate takes the mutant value with probability `cr`; one
    /// random coordinate always does. Coordinates that leave the bounds are
    /// resampled uniformly within them.
    pub fn de_crossover(
        &mut self,
        target: &[f64],
        r1: &[f64],
        r2: &[f64],
        cr: f64,
        f: f64,
        bounds: &[(f64, f64)],
    ) -> Vec<f64> {
        let dims = target.len();
        let forced = if dims > 0 { self.index(dims) } else { 0 };

        let mut child = target.to_vec();
        for k in 0..dims {
            if k == forced || self.chance(cr) {
                child[k] = target[k] + f * (r1[k] - r2[k]);
            }
        }

        for (v, &(lo, hi)) in child.iter_mut().zip(bounds) {
            if *v < lo || *v > hi {
                *v = self.uniform((lo, hi));
            }
        }
        child
    }

    /// Bounded polynomial mutation applied to each coordinate with
    /// probability `rate`.
    pub fn polynomial_mutation(&mut self, x: &mut [f64], bounds: &[(f64, f64)], eta_m: f64, rate: f64) {
        let mut_pow = 1.0 / (eta_m + 1.0);

        for (v, &(lo, hi)) in x.iter_mut().zip(bounds) {
            if !self.chance(rate) || hi <= lo {
                continue;
            }
            let span = hi - lo;
            let delta1 = (*v - lo) / span;
            let delta2 = (hi - *v) / span;
            let rnd = self.rng.r#gen::<f64>();

            let deltaq = if rnd <= 0.5 {
                let xy = 1.0 - delta1;
                let val = 2.0 * rnd + (1.0 - 2.0 * rnd) * xy.powf(eta_m + 1.0);
                val.powf(mut_pow) - 1.0
            } else {
                let xy = 1.0 - delta2;
                let val = 2.0 * (1.0 - rnd) + 2.0 * (rnd - 0.5) * xy.powf(eta_m + 1.0);
                1.0 - val.powf(mut_pow)
            };

            *v = (*v + deltaq * span).clamp(lo, hi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generation_seeds_differ() {
        assert_ne!(generation_seed(1, 0), generation_seed(1, 1));
        assert_ne!(generation_seed(1, 1), generation_seed(2, 1));
        assert_eq!(generation_seed(42, 7), generation_seed(42, 7));
    }

    #[test]
    fn test_deterministic() {
        let bounds = vec![(0.0, 1.0); 4];
        let a = VariationRng::for_generation(9, 3).random_vector(&bounds);
        let b = VariationRng::for_generation(9, 3).random_vector(&bounds);
        assert_eq!(a, b);
    }

    #[test]
    fn test_degenerate_bounds() {
        let mut rng = VariationRng::new(0);
        assert_eq!(rng.uniform((2.0, 2.0)), 2.0);

        let mut x = vec![2.0];
        rng.polynomial_mutation(&mut x, &[(2.0, 2.0)], 20.0, 1.0);
        assert_eq!(x, vec![2.0]);
    }

    #[test]
    fn test_pick_parents_distinct() {
        let mut rng = VariationRng::new(5);
        let pool = [3, 8, 11];
        for _ in 0..100 {
            let (a, b) = rng.pick_parents(&pool);
            assert_ne!(a, b);
            assert!(pool.contains(&a) && pool.contains(&b));
        }
        assert_eq!(rng.pick_parents(&[4]), (4, 4));
    }

    #[test]
    fn test_de_full_crossover() {
        let mut rng = VariationRng::new(1);
        let bounds = vec![(-10.0, 10.0); 3];
        let child = rng.de_crossover(
            &[1.0, 1.0, 1.0],
            &[2.0, 3.0, 4.0],
            &[0.0, 1.0, 2.0],
            1.0,
            0.5,
            &bounds,
        );
        assert_eq!(child, vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_de_forces_one_coordinate() {
        let mut rng = VariationRng::new(2);
        let bounds = vec![(-10.0, 10.0); 5];
        let target = vec![0.0; 5];
        let child = rng.de_crossover(&target, &[1.0; 5], &[0.0; 5], 0.0, 1.0, &bounds);
        assert_eq!(child.iter().filter(|&&v| v == 1.0).count(), 1);
    }

    proptest! {
        #[test]
        fn prop_offspring_within_bounds(
            seed in any::<u64>(),
            f in 0.1f64..2.0,
            cr in 0.0f64..=1.0,
            eta_m in 0.0f64..50.0,
            coords in prop::collection::vec((0.0f64..1.0, 0.0f64..1.0, 0.0f64..1.0), 1..8),
        ) {
            let bounds: Vec<(f64, f64)> = (0..coords.len())
                .map(|i| (-(i as f64), 1.0 + i as f64))
                .collect();
            let scale = |t: f64, (lo, hi): (f64, f64)| lo + t * (hi - lo);
            let target: Vec<f64> = coords.iter().zip(&bounds).map(|(c, &b)| scale(c.0, b)).collect();
            let r1: Vec<f64> = coords.iter().zip(&bounds).map(|(c, &b)| scale(c.1, b)).collect();
            let r2: Vec<f64> = coords.iter().zip(&bounds).map(|(c, &b)| scale(c.2, b)).collect();

            let mut rng = VariationRng::new(seed);
            let mut child = rng.de_crossover(&target, &r1, &r2, cr, f, &bounds);
            rng.polynomial_mutation(&mut child, &bounds, eta_m, 1.0);

            for (v, &(lo, hi)) in child.iter().zip(&bounds) {
                prop_assert!(*v >= lo && *v <= hi, "{} outside [{}, {}]", v, lo, hi);
            }
        }
    }
}
