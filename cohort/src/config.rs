use std::path::Path;

use host_core::{
    stat::AgeGroups,
    within_host::{
        commons::WithinHostParams, pathogenesis::ThresholdPathogenesis, TreatmentSchedule,
    },
};
use serde::{Deserialize, Serialize};

/// Parameters of a cohort run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub seed: u64,
    pub n_hosts: usize,
    pub days: u32,
    /// days between surveys
    pub survey_interval: u32,
    /// mean number of new infections per host per day
    pub inoculation_rate: f64,
    /// hosts start with ages drawn uniformly from this range, in years
    pub min_age: f64,
    pub max_age: f64,
    /// body mass of an adult in kg, scaled down linearly for children
    pub adult_body_mass: f64,
    pub age_groups: AgeGroups,
    /// course given to a host on the day it falls sick
    pub treatment: Option<TreatmentSchedule>,
    pub pathogenesis: ThresholdPathogenesis,
    pub within_host: WithinHostParams,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            n_hosts: 1000,
            days: 365,
            survey_interval: 30,
            inoculation_rate: 0.01,
            min_age: 0.0,
            max_age: 60.0,
            adult_body_mass: 60.0,
            age_groups: AgeGroups::default(),
            treatment: None,
            pathogenesis: ThresholdPathogenesis::default(),
            within_host: WithinHostParams::default(),
        }
    }
}

impl CohortConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.within_host.validate()?;
        anyhow::ensure!(self.n_hosts > 0, "n_hosts must be positive");
        anyhow::ensure!(self.survey_interval > 0, "survey_interval must be positive");
        anyhow::ensure!(
            self.inoculation_rate >= 0.0 && self.inoculation_rate.is_finite(),
            "inoculation_rate must be non-negative, got {}",
            self.inoculation_rate
        );
        anyhow::ensure!(
            0.0 <= self.min_age && self.min_age < self.max_age,
            "age range [{}, {}) is empty",
            self.min_age,
            self.max_age
        );
        anyhow::ensure!(
            self.adult_body_mass > 0.0,
            "adult_body_mass must be positive"
        );
        if let Some(schedule) = &self.treatment {
            for dose in &schedule.doses {
                self.within_host.drug_index(&dose.drug)?;
                anyhow::ensure!(
                    dose.mg_per_kg >= 0.0 && (0.0..1.0).contains(&dose.time),
                    "invalid dose of {}",
                    dose.drug
                );
            }
        }
        Ok(())
    }

    pub fn body_mass(&self, age_years: f64) -> f64 {
        self.adult_body_mass * ((age_years + 1.0) / 20.0).min(1.0)
    }
}
