/// Densities below this are treated as extinct (parasites per microlitre).
pub const EXTINCTION_THRESHOLD: f64 = 1.0e-5;

/// Clamps a density to exactly zero once it drops below [`EXTINCTION_THRESHOLD`].
#[inline]
pub fn floor_extinct(p: f64) -> f64 {
    if p < EXTINCTION_THRESHOLD {
        0.0
    } else {
        p
    }
}

/// Probability of escaping a response with stiffness 3: `1 / (1 + (x / critical)^3)`.
#[inline]
pub fn cubic_escape(x: f64, critical: f64) -> f64 {
    let base = x / critical;
    1.0 / (1.0 + base * base * base)
}

/// Probability of escaping a response with stiffness 1, never below `floor`.
#[inline]
pub fn linear_escape(x: f64, critical: f64, floor: f64) -> f64 {
    (1.0 - floor) / (1.0 + x / critical) + floor
}

/// Index into a four-slot ring that advances every two days, so the slot
/// read today was written eight days ago.
#[inline]
pub fn lag_index(age_days: u32) -> usize {
    ((age_days % 8) / 2) as usize
}

/// Converts a (mean, sd) pair to gamma (shape, scale).
pub fn gamma_shape_scale(mean: f64, sd: f64) -> (f64, f64) {
    let shape = mean.powi(2) / sd.powi(2);
    (shape, sd.powi(2) / mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_extinct() {
        assert_eq!(floor_extinct(9.9e-6), 0.0);
        assert_eq!(floor_extinct(1.0e-5), 1.0e-5);
        assert_eq!(floor_extinct(-1.0), 0.0);
    }

    #[test]
    fn test_escape_curves() {
        assert_eq!(cubic_escape(0.0, 30.0), 1.0);
        assert!((cubic_escape(30.0, 30.0) - 0.5).abs() < 1e-12);
        assert_eq!(linear_escape(0.0, 5.0, 0.01), 1.0);
        let s = linear_escape(1.0e12, 5.0, 0.01);
        assert!(s > 0.01 && s < 0.0100001);
    }

    #[test]
    fn test_lag_index_cycles_every_eight_days() {
        let idx = (0..16).map(lag_index).collect::<Vec<_>>();
        assert_eq!(idx, vec![0, 0, 1, 1, 2, 2, 3, 3, 0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_gamma_shape_scale_keeps_moments() {
        let (shape, scale) = gamma_shape_scale(16.0, 10.4);
        assert!((shape * scale - 16.0).abs() < 1e-9);
        assert!((shape * scale * scale - 10.4 * 10.4).abs() < 1e-9);

        let (shape, scale) = gamma_shape_scale(2.25, 0.2);
        assert!((shape * scale - 2.25).abs() < 1e-12);
        assert!((scale - 0.04 / 2.25).abs() < 1e-15);
    }
}
