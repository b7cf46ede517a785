use std::{io, sync::OnceLock};

use checkpoint::Checkpoint;

use super::{Infection, InfectionCore};
use crate::{
    util::{
        math::{cubic_escape, floor_extinct, lag_index, linear_escape, EXTINCTION_THRESHOLD},
        random::RandomSource,
    },
    within_host::commons::MolineauxOptions,
};

/// Maximum number of antigenic variants of one infection.
pub const MAX_VARIANTS: usize = 64;
/// Slots of the lagged-density rings (one slot per two days, eight days of lag).
const TAUS: usize = 4;

/// decay of variant-specific immunity, per day
const SIGMA: f64 = 0.02;
/// minimum escape from variant-transcending immunity
const BETA: f64 = 0.01;
/// fraction of parasites switching variant per two-day cycle
const S_PROB: f64 = 0.02;
/// geometric weight of switching into each successive variant
const Q: f64 = 0.3;

const MU_M: f64 = 16.0;
const SIGMA_M: f64 = 10.4;
const SHAPE_M: f64 = 2.4;
const SCALE_M: f64 = 6.8;

const K_C: f64 = 0.2;
const K_M: f64 = 0.04;
const PSTAR_V: f64 = 30.0;
/// daily cap on the antigenic stimulus of variant-transcending immunity
const C: f64 = 1.0;

const INITIAL_DENSITY: f64 = 0.1;

/// (days between first and last positive slide, density at the first local
/// maximum) for each case of the malaria therapy data.
const CASE_SPECIFIC_DATA: [(f64, f64); 35] = [
    (216.0, 18600.0),
    (198.0, 13080.0),
    (206.0, 45720.0),
    (366.0, 23760.0),
    (230.0, 60840.0),
    (172.0, 6000.0),
    (100.0, 2340.0),
    (236.0, 31440.0),
    (236.0, 453600.0),
    (120.0, 4240.0),
    (176.0, 195840.0),
    (178.0, 60120.0),
    (36.0, 8720.0),
    (44.0, 8000.0),
    (242.0, 395280.0),
    (70.0, 28320.0),
    (292.0, 200160.0),
    (248.0, 59320.0),
    (98.0, 66480.0),
    (176.0, 61200.0),
    (234.0, 169920.0),
    (226.0, 46800.0),
    (270.0, 19260.0),
    (278.0, 86040.0),
    (212.0, 110160.0),
    (264.0, 43200.0),
    (364.0, 133920.0),
    (184.0, 222480.0),
    (160.0, 21420.0),
    (220.0, 74160.0),
    (132.0, 210960.0),
    (176.0, 89280.0),
    (208.0, 105840.0),
    (330.0, 21600.0),
    (404.0, 156240.0),
];

fn q_pow() -> &'static [f64; MAX_VARIANTS] {
    static Q_POW: OnceLock<[f64; MAX_VARIANTS]> = OnceLock::new();
    Q_POW.get_or_init(|| std::array::from_fn(|i| Q.powi(i as i32 + 1)))
}

/// One antigenic variant of an infection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Variant {
    /// per-day multiplier, applied on both days of a cycle
    growth_rate: f64,
    density: f64,
    specific_summation: f64,
    /// density waiting to be expressed on the next even day
    pending_density: f64,
    lagged_density: [f64; TAUS],
}

impl Variant {
    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn pending_density(&self) -> f64 {
        self.pending_density
    }

    pub fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    fn update_density(&mut self, survival_factor: f64, age_days: u32) -> f64 {
        self.density *= self.growth_rate;
        self.density *= survival_factor;
        self.pending_density *= survival_factor;
        if self.density == 0.0 && age_days % 2 == 0 {
            self.density = self.pending_density;
        }
        self.density = floor_extinct(self.density);
        self.density
    }

    fn specific_summation(&mut self, age_days: u32) -> f64 {
        let i = lag_index(age_days);
        self.specific_summation =
            self.specific_summation * (-2.0 * SIGMA).exp() + self.lagged_density[i];
        self.lagged_density[i] = self.density;
        self.specific_summation
    }

    /// `switched_in` is the density switching into this variant and `escape`
    /// the fraction escaping every immune response over the next two days.
    fn update_growth_rate(&mut self, switched_in: f64, escape: f64) {
        let new_density =
            floor_extinct(((1.0 - S_PROB) * self.density + S_PROB * switched_in) * escape);
        if self.density == 0.0 {
            self.pending_density = new_density;
            self.growth_rate = 0.0;
        } else {
            self.pending_density = 0.0;
            self.growth_rate = (new_density / self.density).sqrt();
        }
    }

    fn is_zero(&self) -> bool {
        self.growth_rate == 0.0
            && self.density == 0.0
            && self.specific_summation == 0.0
            && self.pending_density == 0.0
            && self.lagged_density.iter().all(|p| *p == 0.0)
    }
}

impl Checkpoint for Variant {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        let non_zero = !self.is_zero();
        non_zero.write(writer)?;
        if non_zero {
            self.growth_rate.write(writer)?;
            self.density.write(writer)?;
            self.specific_summation.write(writer)?;
            self.pending_density.write(writer)?;
            self.lagged_density.write(writer)?;
        }
        Ok(())
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        if !bool::read(reader)? {
            return Ok(Self::default());
        }
        Ok(Self {
            growth_rate: f64::read(reader)?,
            density: f64::read(reader)?,
            specific_summation: f64::read(reader)?,
            pending_density: f64::read(reader)?,
            lagged_density: <[f64; TAUS]>::read(reader)?,
        })
    }
}

/// Multi-variant infection driven by innate, variant-transcending and
/// variant-specific immune responses.
///
/// Growth rates are recomputed every second day and applied as a square root
/// on each of the two days, so densities on even days are the fully updated
/// values.
#[derive(Debug, Clone, PartialEq)]
pub struct MolineauxInfection {
    core: InfectionCore,
    multiplication_factors: [f64; MAX_VARIANTS],
    /// grows up to [`MAX_VARIANTS`] and never shrinks
    variants: Vec<Variant>,
    lagged_transcending: [f64; TAUS],
    transcending_summation: f64,
    critical_density_innate: f64,
    critical_density_acquired: f64,
}

impl MolineauxInfection {
    pub fn new<R: RandomSource + ?Sized>(
        genotype: usize,
        start_day: u32,
        opts: &MolineauxOptions,
        rng: &mut R,
    ) -> Self {
        let multiplication_factors =
            std::array::from_fn(|_| Self::sample_multiplication_factor(opts, rng));
        let (critical_density_innate, critical_density_acquired) =
            Self::sample_critical_densities(opts, rng);
        Self::with_parameters(
            genotype,
            start_day,
            multiplication_factors,
            critical_density_innate,
            critical_density_acquired,
        )
    }

    fn with_parameters(
        genotype: usize,
        start_day: u32,
        multiplication_factors: [f64; MAX_VARIANTS],
        critical_density_innate: f64,
        critical_density_acquired: f64,
    ) -> Self {
        Self {
            core: InfectionCore::new(genotype, start_day),
            multiplication_factors,
            variants: vec![Variant {
                density: INITIAL_DENSITY,
                ..Default::default()
            }],
            lagged_transcending: [0.0; TAUS],
            transcending_summation: 0.0,
            critical_density_innate,
            critical_density_acquired,
        }
    }

    fn sample_multiplication_factor<R: RandomSource + ?Sized>(
        opts: &MolineauxOptions,
        rng: &mut R,
    ) -> f64 {
        loop {
            let m = if opts.multiplication_factor_gamma {
                rng.gamma(SHAPE_M, SCALE_M)
            } else {
                rng.gaussian(MU_M, SIGMA_M)
            };
            if m >= 1.0 {
                return m;
            }
        }
    }

    /// Falls back to the case table when either distribution is missing,
    /// a configuration `WithinHostParams::validate` rejects.
    fn sample_critical_densities<R: RandomSource + ?Sized>(
        opts: &MolineauxOptions,
        rng: &mut R,
    ) -> (f64, f64) {
        match (&opts.first_local_max, &opts.diff_pos_days) {
            (Some(local_max), Some(duration)) if !opts.pairwise_sample => {
                let c = K_C * local_max.sample(rng).powi(10);
                let m = K_M * duration.sample(rng).powi(10);
                (c, m)
            }
            _ => {
                let (duration, peak) = CASE_SPECIFIC_DATA[rng.uniform(CASE_SPECIFIC_DATA.len())];
                (K_C * peak, K_M * duration)
            }
        }
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn multiplication_factors(&self) -> &[f64; MAX_VARIANTS] {
        &self.multiplication_factors
    }

    /// Critical density of the innate response (Pstar_c).
    pub fn critical_density_innate(&self) -> f64 {
        self.critical_density_innate
    }

    /// Critical density of the variant-transcending response (Pstar_m).
    pub fn critical_density_acquired(&self) -> f64 {
        self.critical_density_acquired
    }

    fn transcending_summation(&mut self, age_days: u32) -> f64 {
        let i = lag_index(age_days);
        // no decay: rho is zero
        self.transcending_summation += self.lagged_transcending[i];
        self.lagged_transcending[i] = self.core.density.min(C);
        self.transcending_summation
    }

    fn update_growth_rates(&mut self, age_days: u32) {
        let density = self.core.density;
        let sc = cubic_escape(density, self.critical_density_innate);
        let sm = linear_escape(
            self.transcending_summation(age_days),
            self.critical_density_acquired,
            BETA,
        );

        let mut s = [1.0; MAX_VARIANTS];
        for (s_i, v) in s.iter_mut().zip(self.variants.iter_mut()) {
            *s_i = cubic_escape(v.specific_summation(age_days), PSTAR_V);
        }
        let q_pow = q_pow();
        let sum_qs = q_pow.iter().zip(&s).map(|(q, s)| q * s).sum::<f64>();

        let expressed = self.variants.len();
        for i in 0..MAX_VARIANTS {
            let p_i = if s[i] < 0.1 {
                0.0
            } else {
                q_pow[i] * s[i] / sum_qs
            };
            let escape = self.multiplication_factors[i] * s[i] * sc * sm;
            if i < expressed {
                self.variants[i].update_growth_rate(p_i * density, escape);
            } else {
                let new_density = floor_extinct(S_PROB * p_i * density * escape);
                if new_density > 0.0 {
                    self.variants.resize(i + 1, Variant::default());
                    self.variants[i].pending_density = new_density;
                    tracing::trace!("variant {} emerged at density {}", i, new_density);
                }
            }
        }
    }
}

impl Infection for MolineauxInfection {
    fn core(&self) -> &InfectionCore {
        &self.core
    }

    fn update_density(&mut self, survival_factor: f64, age_days: u32) -> bool {
        self.core.density = if age_days == 0 {
            self.variants[0].density
        } else {
            self.variants
                .iter_mut()
                .map(|v| v.update_density(survival_factor, age_days))
                .sum()
        };
        self.core.cumulative_exposure += self.core.density;

        if self.core.density <= EXTINCTION_THRESHOLD {
            return true;
        }
        if age_days % 2 == 0 {
            self.update_growth_rates(age_days);
        }
        false
    }
}

impl Checkpoint for MolineauxInfection {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.core.write(writer)?;
        self.multiplication_factors.write(writer)?;
        self.variants.write(writer)?;
        self.lagged_transcending.write(writer)?;
        self.transcending_summation.write(writer)?;
        self.critical_density_innate.write(writer)?;
        self.critical_density_acquired.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            core: InfectionCore::read(reader)?,
            multiplication_factors: <[f64; MAX_VARIANTS]>::read(reader)?,
            variants: Vec::read(reader)?,
            lagged_transcending: <[f64; TAUS]>::read(reader)?,
            transcending_summation: f64::read(reader)?,
            critical_density_innate: f64::read(reader)?,
            critical_density_acquired: f64::read(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        q_pow, MolineauxInfection, CASE_SPECIFIC_DATA, INITIAL_DENSITY, K_C, K_M, MAX_VARIANTS,
        S_PROB,
    };
    use crate::{
        util::random::{DistInfo, RandomSource},
        within_host::{commons::MolineauxOptions, infection::Infection},
    };
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn new_infection(seed: u64) -> MolineauxInfection {
        let rng = &mut ChaCha12Rng::seed_from_u64(seed);
        MolineauxInfection::new(0, 0, &MolineauxOptions::default(), rng)
    }

    #[test]
    fn test_creation() {
        let inf = new_infection(0);
        assert!(inf.multiplication_factors().iter().all(|m| *m >= 1.0));
        assert_eq!(inf.variants().len(), 1);
        assert_eq!(inf.variants()[0].density(), INITIAL_DENSITY);
        assert!(CASE_SPECIFIC_DATA
            .iter()
            .any(|(d, p)| K_C * p == inf.critical_density_innate()
                && K_M * d == inf.critical_density_acquired()));
    }

    #[test]
    fn test_gamma_multiplication_factors() {
        let rng = &mut ChaCha12Rng::seed_from_u64(4);
        let opts = MolineauxOptions {
            multiplication_factor_gamma: true,
            ..Default::default()
        };
        let inf = MolineauxInfection::new(0, 0, &opts, rng);
        assert!(inf.multiplication_factors().iter().all(|m| *m >= 1.0));
    }

    #[test]
    fn test_independent_critical_densities() {
        let rng = &mut ChaCha12Rng::seed_from_u64(0);
        let opts = MolineauxOptions {
            pairwise_sample: false,
            first_local_max: Some(DistInfo::new(4.7, 0.0, false)),
            diff_pos_days: Some(DistInfo::new(2.25, 0.0, false)),
            ..Default::default()
        };
        let inf = MolineauxInfection::new(0, 0, &opts, rng);
        let c = K_C * 4.7f64.powi(10);
        let m = K_M * 2.25f64.powi(10);
        assert!((inf.critical_density_innate() - c).abs() / c < 1e-12);
        assert!((inf.critical_density_acquired() - m).abs() / m < 1e-12);
    }

    #[test]
    fn test_gamma_critical_densities_match_moments() {
        let rng = &mut ChaCha12Rng::seed_from_u64(8);
        let opts = MolineauxOptions {
            pairwise_sample: false,
            first_local_max: Some(DistInfo::new(2.25, 0.2, true)),
            diff_pos_days: Some(DistInfo::new(1.6, 0.1, true)),
            ..Default::default()
        };
        let n = 5000;
        let (mut sum_c, mut sum_m) = (0.0, 0.0);
        for _ in 0..n {
            let inf = MolineauxInfection::new(0, 0, &opts, rng);
            sum_c += (inf.critical_density_innate() / K_C).powf(0.1);
            sum_m += (inf.critical_density_acquired() / K_M).powf(0.1);
        }
        let (mean_c, mean_m) = (sum_c / n as f64, sum_m / n as f64);
        assert!((mean_c - 2.25).abs() < 0.02, "mean = {mean_c}");
        assert!((mean_m - 1.6).abs() < 0.01, "mean = {mean_m}");
    }

    #[test]
    fn test_day_zero_keeps_seed_density() {
        let mut inf = new_infection(1);
        assert!(!inf.update_density(0.5, 0));
        assert_eq!(inf.density(), INITIAL_DENSITY);
        assert_eq!(inf.cumulative_exposure(), INITIAL_DENSITY);
    }

    #[test]
    fn test_zero_survival_is_extinction() {
        let mut inf = new_infection(2);
        assert!(!inf.update_density(1.0, 0));
        assert!(inf.update_density(0.0, 1));
        assert_eq!(inf.density(), 0.0);
    }

    #[test]
    fn test_trajectory_invariants() {
        let rng = &mut ChaCha12Rng::seed_from_u64(10);
        for seed in 0..20 {
            let mut inf = new_infection(seed);
            let mut prev = inf.variants().iter().map(|v| v.density()).collect::<Vec<_>>();
            let mut prev_cum = 0.0;
            for day in 0..500 {
                let sf = 0.6 + 0.4 * rng.uniform_01();
                let extinct = inf.update_density(sf, day);
                let variants = inf.variants();

                assert!(variants.len() >= prev.len());
                assert!(variants.len() <= MAX_VARIANTS);
                assert!(inf.density() >= 0.0);
                assert!(inf.cumulative_exposure() >= prev_cum);
                for (i, v) in variants.iter().enumerate() {
                    assert!(v.density() >= 0.0 && v.pending_density() >= 0.0);
                    // a zero density only comes back through pending promotion on an even day
                    if prev.get(i).map_or(true, |p| *p == 0.0) && v.density() > 0.0 {
                        assert_eq!(day % 2, 0, "variant {i} regrew on day {day}");
                    }
                }

                prev = variants.iter().map(|v| v.density()).collect();
                prev_cum = inf.cumulative_exposure();
                if extinct {
                    break;
                }
            }
        }
    }

    #[test]
    fn test_checkpoint_continues_bit_identically() {
        let (n, m) = (37, 60);
        let survival = |day: u32| 0.7 + 0.3 * ((day * 7919 % 101) as f64 / 101.0);

        let mut uninterrupted = new_infection(3);
        let mut resumed = new_infection(3);
        for day in 0..n {
            uninterrupted.update_density(survival(day), day);
            resumed.update_density(survival(day), day);
        }
        let bytes = checkpoint::to_bytes(&resumed).unwrap();
        let mut resumed: MolineauxInfection = checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(resumed, uninterrupted);

        for day in n..n + m {
            let a = uninterrupted.update_density(survival(day), day);
            let b = resumed.update_density(survival(day), day);
            assert_eq!(a, b);
            assert_eq!(uninterrupted.density().to_bits(), resumed.density().to_bits());
        }
        assert_eq!(resumed, uninterrupted);
    }

    #[test]
    fn test_unit_factors_decay_only_by_switching() {
        // no multiplication and immune responses that never bite
        let mut inf = MolineauxInfection::with_parameters(0, 0, [1.0; MAX_VARIANTS], 1e12, 1e12);
        inf.update_density(1.0, 0);
        let d0 = inf.density();

        // all escape terms are 1 on day 0, so switching into slots too small
        // to emerge is the only loss over the first cycle
        let total_q = q_pow().iter().sum::<f64>();
        let lost = q_pow()[1..]
            .iter()
            .map(|q| q / total_q)
            .filter(|p| S_PROB * p * d0 < crate::util::math::EXTINCTION_THRESHOLD)
            .sum::<f64>();
        let retained = 1.0 - S_PROB * lost;

        inf.update_density(1.0, 1);
        inf.update_density(1.0, 2);
        let d2 = inf.density();
        let half_life = 2.0 * std::f64::consts::LN_2 / -(d2 / d0).ln();
        let expected = 2.0 * std::f64::consts::LN_2 / -retained.ln();
        assert!(
            (half_life - expected).abs() / expected < 1e-6,
            "{half_life} != {expected}"
        );

        // afterwards immunity can only add to the loss
        let mut prev = d2;
        for day in 3..200 {
            inf.update_density(1.0, day);
            if day % 2 == 0 {
                assert!(inf.density() <= prev * (1.0 + 1e-12));
                prev = inf.density();
            }
        }
    }
}
