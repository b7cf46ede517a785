use serde::{Deserialize, Serialize};

use crate::{pkpd::drug::DrugType, util::random::DistInfo};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("distribution parameters for {0} are required when pairwise sampling is off")]
    MissingDistribution(&'static str),
    #[error("invalid distribution parameters for {0}")]
    InvalidDistribution(&'static str),
    #[error("{name} must be {expected}, got {value}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("genotype frequencies must be non-empty, non-negative and sum to 1")]
    GenotypeFrequencies,
    #[error("drug {drug} has {found} pharmacodynamic entries, expected 1 or {expected}")]
    PdGenotypeMismatch {
        drug: String,
        expected: usize,
        found: usize,
    },
    #[error("drug {0} is listed more than once")]
    DuplicateDrug(String),
    #[error("unknown drug {0}")]
    UnknownDrug(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InfectionModelKind {
    #[default]
    Molineaux,
    Dummy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MolineauxOptions {
    /// Draw variant multiplication factors from a gamma instead of a gaussian.
    pub multiplication_factor_gamma: bool,
    /// Draw both critical densities jointly from the malaria therapy table.
    pub pairwise_sample: bool,
    /// tenth root of the density at the first local maximum, scaled by k_c
    pub first_local_max: Option<DistInfo>,
    /// tenth root of the days between the first and last positive slide, scaled by k_m
    pub diff_pos_days: Option<DistInfo>,
}

impl Default for MolineauxOptions {
    fn default() -> Self {
        Self {
            multiplication_factor_gamma: false,
            pairwise_sample: true,
            first_local_max: None,
            diff_pos_days: None,
        }
    }
}

impl MolineauxOptions {
    fn validate(&self) -> Result<(), ParamsError> {
        if self.pairwise_sample {
            return Ok(());
        }
        for (name, dist) in [
            ("first_local_max", &self.first_local_max),
            ("diff_pos_days", &self.diff_pos_days),
        ] {
            match dist {
                None => return Err(ParamsError::MissingDistribution(name)),
                Some(d) if !d.is_valid() => return Err(ParamsError::InvalidDistribution(name)),
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmunityParams {
    /// variance of the log innate survival factor between hosts
    pub sigma_i_sq: f64,
    /// per-step decay of immune effectors (applies to both h and Y)
    pub immune_effector_decay: f64,
    /// per-step decay of asexual immunity, saturating against the star constants
    pub asexual_immunity_decay: f64,
    pub immunity_penalty: f64,
    pub cumulative_h_star: f64,
    pub cumulative_y_star: f64,
    /// maternal immunity at birth
    pub alpha_m: f64,
    pub decay_m: f64,
}

impl Default for ImmunityParams {
    fn default() -> Self {
        Self {
            sigma_i_sq: 10.2,
            immune_effector_decay: 0.0,
            asexual_immunity_decay: 0.0,
            immunity_penalty: 0.0,
            cumulative_h_star: 97.3981,
            cumulative_y_star: 35158523.31,
            alpha_m: 0.9011,
            decay_m: 2.5314,
        }
    }
}

impl ImmunityParams {
    pub fn sigma_i(&self) -> f64 {
        self.sigma_i_sq.sqrt()
    }

    pub fn immune_effector_remain(&self) -> f64 {
        (-self.immune_effector_decay).exp()
    }

    pub fn asexual_immunity_remain(&self) -> f64 {
        (-self.asexual_immunity_decay).exp()
    }

    pub fn penalty(&self) -> f64 {
        1.0 - self.immunity_penalty.exp()
    }

    fn validate(&self) -> Result<(), ParamsError> {
        let checks = [
            ("sigma_i_sq", self.sigma_i_sq, self.sigma_i_sq >= 0.0),
            (
                "immune_effector_decay",
                self.immune_effector_decay,
                self.immune_effector_decay >= 0.0,
            ),
            (
                "asexual_immunity_decay",
                self.asexual_immunity_decay,
                self.asexual_immunity_decay >= 0.0,
            ),
            (
                "cumulative_h_star",
                self.cumulative_h_star,
                self.cumulative_h_star > 0.0,
            ),
            (
                "cumulative_y_star",
                self.cumulative_y_star,
                self.cumulative_y_star > 0.0,
            ),
            ("decay_m", self.decay_m, self.decay_m >= 0.0),
        ];
        for (name, value, ok) in checks {
            if !ok {
                return Err(ParamsError::InvalidValue {
                    name,
                    expected: "non-negative (positive for the star constants)",
                    value,
                });
            }
        }
        if !self.immunity_penalty.is_finite() {
            return Err(ParamsError::InvalidValue {
                name: "immunity_penalty",
                expected: "finite",
                value: self.immunity_penalty,
            });
        }
        Ok(())
    }
}

/// Immutable model configuration, validated once and passed by reference to
/// every operation that needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WithinHostParams {
    pub infection_model: InfectionModelKind,
    pub molineaux: MolineauxOptions,
    pub immunity: ImmunityParams,
    /// parasites per microlitre above which a host or infection is patent
    pub detection_limit: f64,
    pub genotype_frequencies: Vec<f64>,
    pub drugs: Vec<DrugType>,
}

impl Default for WithinHostParams {
    fn default() -> Self {
        Self {
            infection_model: InfectionModelKind::default(),
            molineaux: MolineauxOptions::default(),
            immunity: ImmunityParams::default(),
            detection_limit: 40.0,
            genotype_frequencies: vec![1.0],
            drugs: Vec::new(),
        }
    }
}

impl WithinHostParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        self.molineaux.validate()?;
        self.immunity.validate()?;
        if !(self.detection_limit >= 0.0) {
            return Err(ParamsError::InvalidValue {
                name: "detection_limit",
                expected: "non-negative",
                value: self.detection_limit,
            });
        }
        let total = self.genotype_frequencies.iter().sum::<f64>();
        if self.genotype_frequencies.is_empty()
            || self.genotype_frequencies.iter().any(|f| !(*f >= 0.0))
            || (total - 1.0).abs() > 1e-6
        {
            return Err(ParamsError::GenotypeFrequencies);
        }
        for (i, drug) in self.drugs.iter().enumerate() {
            if self.drugs[..i]
                .iter()
                .any(|d| d.abbreviation == drug.abbreviation)
            {
                return Err(ParamsError::DuplicateDrug(drug.abbreviation.clone()));
            }
            drug.validate(self.n_genotypes())?;
        }
        Ok(())
    }

    pub fn n_genotypes(&self) -> usize {
        self.genotype_frequencies.len()
    }

    pub fn drug_index(&self, abbreviation: &str) -> Result<usize, ParamsError> {
        self.drugs
            .iter()
            .position(|d| d.abbreviation == abbreviation)
            .ok_or_else(|| ParamsError::UnknownDrug(abbreviation.to_string()))
    }
}
