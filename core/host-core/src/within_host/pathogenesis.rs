use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::EnumCount,
    Serialize,
    Deserialize,
)]
pub enum MorbidityOutcome {
    None,
    Uncomplicated,
    Severe,
}

impl MorbidityOutcome {
    pub fn is_sick(&self) -> bool {
        !matches!(self, MorbidityOutcome::None)
    }
}

/// Classifies a host's morbidity from its parasite densities of the last step.
pub trait PathogenesisModel {
    fn determine_morbidity(
        &mut self,
        age_years: f64,
        peak_density: f64,
        total_density: f64,
    ) -> MorbidityOutcome;
}

/// Fixed density thresholds: a clinical episode above `pyrogenic_threshold`,
/// severe once the step's peak infection density exceeds `severe_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdPathogenesis {
    pub pyrogenic_threshold: f64,
    pub severe_threshold: f64,
}

impl Default for ThresholdPathogenesis {
    fn default() -> Self {
        Self {
            pyrogenic_threshold: 5000.0,
            severe_threshold: 250000.0,
        }
    }
}

impl PathogenesisModel for ThresholdPathogenesis {
    fn determine_morbidity(
        &mut self,
        _age_years: f64,
        peak_density: f64,
        total_density: f64,
    ) -> MorbidityOutcome {
        if peak_density > self.severe_threshold {
            MorbidityOutcome::Severe
        } else if total_density > self.pyrogenic_threshold {
            MorbidityOutcome::Uncomplicated
        } else {
            MorbidityOutcome::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MorbidityOutcome, PathogenesisModel, ThresholdPathogenesis};

    #[test]
    fn test_thresholds() {
        let mut p = ThresholdPathogenesis::default();
        assert_eq!(p.determine_morbidity(5.0, 100.0, 100.0), MorbidityOutcome::None);
        assert_eq!(
            p.determine_morbidity(5.0, 4000.0, 6000.0),
            MorbidityOutcome::Uncomplicated
        );
        assert_eq!(
            p.determine_morbidity(5.0, 3.0e5, 3.0e5),
            MorbidityOutcome::Severe
        );
        assert!(!MorbidityOutcome::None.is_sick());
        assert_eq!(MorbidityOutcome::Severe.to_string(), "Severe");
    }
}
