use rand::Rng;
use rand_distr::{Distribution, Gamma, StandardNormal};
use serde::{Deserialize, Serialize};

use super::math::gamma_shape_scale;

/// Draws consumed by the within-host models.
///
/// Every call advances the underlying stream by one draw, so the order of calls
/// fixes the trajectory for a given seed.
pub trait RandomSource {
    fn gaussian(&mut self, mean: f64, sd: f64) -> f64;
    fn gamma(&mut self, shape: f64, scale: f64) -> f64;
    /// Uniform integer in `0..n`.
    fn uniform(&mut self, n: usize) -> usize;
    fn uniform_01(&mut self) -> f64;

    fn log_normal(&mut self, mu: f64, sigma: f64) -> f64 {
        self.gaussian(mu, sigma).exp()
    }
}

impl<R: Rng> RandomSource for R {
    fn gaussian(&mut self, mean: f64, sd: f64) -> f64 {
        mean + sd * self.sample::<f64, _>(StandardNormal)
    }

    fn gamma(&mut self, shape: f64, scale: f64) -> f64 {
        // parameters are checked when the model parameters are validated
        let g = Gamma::new(shape, scale)
            .unwrap_or_else(|e| panic!("invalid gamma parameters ({shape}, {scale}): {e}"));
        g.sample(self)
    }

    fn uniform(&mut self, n: usize) -> usize {
        self.gen_range(0..n)
    }

    fn uniform_01(&mut self) -> f64 {
        self.gen()
    }
}

/// A configured distribution given by its mean and standard deviation.
///
/// With `gamma` set the moments are matched by a gamma distribution,
/// otherwise a gaussian is used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistInfo {
    pub mean: f64,
    pub sd: f64,
    #[serde(default)]
    pub gamma: bool,
}

impl DistInfo {
    pub fn new(mean: f64, sd: f64, gamma: bool) -> Self {
        Self { mean, sd, gamma }
    }

    pub fn sample<R: RandomSource + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.gamma {
            let (shape, scale) = gamma_shape_scale(self.mean, self.sd);
            rng.gamma(shape, scale)
        } else {
            rng.gaussian(self.mean, self.sd)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.mean.is_finite()
            && self.sd.is_finite()
            && self.sd >= 0.0
            && (!self.gamma || (self.mean > 0.0 && self.sd > 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::{DistInfo, RandomSource};
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = ChaCha12Rng::seed_from_u64(7);
        let mut b = ChaCha12Rng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(a.gaussian(16.0, 10.4).to_bits(), b.gaussian(16.0, 10.4).to_bits());
            assert_eq!(a.gamma(2.4, 6.8).to_bits(), b.gamma(2.4, 6.8).to_bits());
            assert_eq!(a.uniform(35), b.uniform(35));
        }
    }

    #[test]
    fn test_gamma_dist_matches_mean() {
        let rng = &mut ChaCha12Rng::seed_from_u64(3);
        let d = DistInfo::new(4.0, 1.0, true);
        let n = 20000;
        let mean = (0..n).map(|_| d.sample(rng)).sum::<f64>() / n as f64;
        assert!((mean - 4.0).abs() < 0.05, "mean = {mean}");

        let d = DistInfo::new(2.25, 0.2, true);
        let xs = (0..n).map(|_| d.sample(rng)).collect::<Vec<_>>();
        let mean = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 2.25).abs() < 0.01, "mean = {mean}");
        assert!((var.sqrt() - 0.2).abs() < 0.01, "sd = {}", var.sqrt());
    }

    #[test]
    fn test_dist_validation() {
        assert!(DistInfo::new(4.7, 0.5, false).is_valid());
        assert!(!DistInfo::new(4.7, -0.5, false).is_valid());
        assert!(!DistInfo::new(-1.0, 0.5, true).is_valid());
        assert!(!DistInfo::new(f64::NAN, 0.5, false).is_valid());
    }

    #[test]
    fn test_uniform_bounds() {
        let rng = &mut ChaCha12Rng::seed_from_u64(1);
        for _ in 0..1000 {
            assert!(rng.uniform(35) < 35);
            let u = rng.uniform_01();
            assert!((0.0..1.0).contains(&u));
        }
    }
}
