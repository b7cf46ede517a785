use std::io;

use checkpoint::Checkpoint;
use serde::{Deserialize, Serialize};

use crate::{util::random::RandomSource, within_host::commons::ParamsError};

/// Pharmacodynamic parameters of a drug against one parasite genotype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdParams {
    /// per day
    pub max_killing_rate: f64,
    /// mg/l
    pub ic50: f64,
    pub slope: f64,
}

impl PdParams {
    /// Survival over `duration` days while the concentration decays from `c0`
    /// at rate `k`; `c0` is advanced to the concentration at the end.
    ///
    /// Closed form of exp(-integral of max_killing_rate * C^n / (C^n + IC50^n) dt).
    fn interval_factor(&self, c0: &mut f64, duration: f64, k: f64) -> f64 {
        let n = self.slope;
        let kn = self.ic50.powf(n);
        let c1 = *c0 * (-k * duration).exp();
        let numerator = kn + c1.powf(n);
        let denominator = kn + c0.powf(n);
        *c0 = c1;
        (numerator / denominator).powf(self.max_killing_rate / (k * n))
    }
}

/// One-compartment drug type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugType {
    pub abbreviation: String,
    /// elimination rate constant for a 1 kg host, per day
    pub elimination_rate: f64,
    /// body-mass exponent applied to the elimination rate (usually negative)
    #[serde(default)]
    pub neg_m_exponent: f64,
    /// mean volume of distribution, l/kg
    pub vol_dist: f64,
    /// coefficient of variation of the volume of distribution between hosts
    #[serde(default)]
    pub vol_dist_cv: f64,
    /// one entry for all genotypes, or one per genotype
    pub pd: Vec<PdParams>,
}

impl DrugType {
    pub fn validate(&self, n_genotypes: usize) -> Result<(), ParamsError> {
        let checks = [
            ("elimination_rate", self.elimination_rate, self.elimination_rate > 0.0),
            ("vol_dist", self.vol_dist, self.vol_dist > 0.0),
            ("vol_dist_cv", self.vol_dist_cv, self.vol_dist_cv >= 0.0),
            (
                "neg_m_exponent",
                self.neg_m_exponent,
                self.neg_m_exponent.is_finite(),
            ),
        ];
        for (name, value, ok) in checks {
            if !ok {
                return Err(ParamsError::InvalidValue {
                    name,
                    expected: "positive and finite",
                    value,
                });
            }
        }
        if self.pd.is_empty() || (self.pd.len() != 1 && self.pd.len() != n_genotypes) {
            return Err(ParamsError::PdGenotypeMismatch {
                drug: self.abbreviation.clone(),
                expected: n_genotypes,
                found: self.pd.len(),
            });
        }
        for pd in &self.pd {
            if !(pd.ic50 > 0.0 && pd.slope > 0.0 && pd.max_killing_rate >= 0.0) {
                return Err(ParamsError::InvalidValue {
                    name: "pd",
                    expected: "ic50 > 0, slope > 0, max_killing_rate >= 0",
                    value: pd.ic50,
                });
            }
        }
        Ok(())
    }

    pub fn elimination_rate_constant(&self, body_mass: f64) -> f64 {
        self.elimination_rate * body_mass.powf(self.neg_m_exponent)
    }

    pub fn pd(&self, genotype: usize) -> &PdParams {
        &self.pd[genotype.min(self.pd.len() - 1)]
    }

    fn sample_vol_dist<R: RandomSource + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.vol_dist_cv == 0.0 {
            return self.vol_dist;
        }
        // lognormal with the configured mean and coefficient of variation
        let sigma_sq = (1.0 + self.vol_dist_cv.powi(2)).ln();
        rng.log_normal(self.vol_dist.ln() - 0.5 * sigma_sq, sigma_sq.sqrt())
    }
}

/// Blood concentration of one drug in one host.
#[derive(Debug, Clone, PartialEq)]
pub struct Drug {
    type_index: usize,
    /// l/kg, sampled once per host
    vol_dist: f64,
    /// mg/l at the start of the current day
    concentration: f64,
    /// (time within today in days, quantity in mg), ordered by time
    doses: Vec<(f64, f64)>,
}

impl Drug {
    pub fn new<R: RandomSource + ?Sized>(
        type_index: usize,
        drug_type: &DrugType,
        rng: &mut R,
    ) -> Self {
        Self {
            type_index,
            vol_dist: drug_type.sample_vol_dist(rng),
            concentration: 0.0,
            doses: Vec::new(),
        }
    }

    pub fn type_index(&self) -> usize {
        self.type_index
    }

    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    pub fn volume_of_distribution(&self, body_mass: f64) -> f64 {
        self.vol_dist * body_mass
    }

    pub fn doses(&self) -> &[(f64, f64)] {
        &self.doses
    }

    /// Records a dose of `qty` mg given `time` days after the start of today.
    ///
    /// # Panics
    /// If `qty` is negative or not finite, or `time` is outside `[0, 1)`.
    pub fn medicate(&mut self, time: f64, qty: f64) {
        assert!(
            qty.is_finite() && qty >= 0.0,
            "dose quantity must be finite and non-negative, got {qty}"
        );
        assert!(
            (0.0..1.0).contains(&time),
            "dose time must be within the day, got {time}"
        );
        let pos = self.doses.partition_point(|&(t, _)| t <= time);
        self.doses.insert(pos, (time, qty));
    }

    /// Concentration `time` days into today, including doses given up to then.
    pub fn concentration_at(&self, time: f64, body_mass: f64, drug_type: &DrugType) -> f64 {
        let k = drug_type.elimination_rate_constant(body_mass);
        let v = self.volume_of_distribution(body_mass);
        let mut c = self.concentration;
        let mut t = 0.0;
        for &(dose_time, qty) in self.doses.iter().take_while(|(dt, _)| *dt <= time) {
            c *= (-k * (dose_time - t)).exp();
            c += qty / v;
            t = dose_time;
        }
        c * (-k * (time - t)).exp()
    }

    /// Survival factor of a `genotype` infection over today. Does not change state.
    pub fn calculate_drug_factor(
        &self,
        genotype: usize,
        body_mass: f64,
        drug_type: &DrugType,
    ) -> f64 {
        let pd = drug_type.pd(genotype);
        let k = drug_type.elimination_rate_constant(body_mass);
        let v = self.volume_of_distribution(body_mass);
        let mut c = self.concentration;
        let mut t = 0.0;
        let mut factor = 1.0;
        for &(dose_time, qty) in &self.doses {
            factor *= pd.interval_factor(&mut c, dose_time - t, k);
            c += qty / v;
            t = dose_time;
        }
        factor * pd.interval_factor(&mut c, 1.0 - t, k)
    }

    /// Advances the concentration to the start of tomorrow and clears today's doses.
    pub fn update_concentration(&mut self, body_mass: f64, drug_type: &DrugType) {
        self.concentration = self.concentration_at(1.0, body_mass, drug_type);
        self.doses.clear();
    }
}

impl Checkpoint for Drug {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.type_index.write(writer)?;
        self.vol_dist.write(writer)?;
        self.concentration.write(writer)?;
        self.doses.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            type_index: usize::read(reader)?,
            vol_dist: f64::read(reader)?,
            concentration: f64::read(reader)?,
            doses: Vec::read(reader)?,
        })
    }
}
