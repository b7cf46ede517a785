use std::io;

use checkpoint::Checkpoint;

use super::{Infection, InfectionCore};

const INITIAL_DENSITY: f64 = 16.0;
const MAX_DENSITY: f64 = 20000.0;
/// Below one parasite per microlitre the infection is cleared.
const MIN_DENSITY: f64 = 1.0;

/// Deterministic infection growing eightfold every two days up to a fixed
/// ceiling. Used for exercising host-level behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct DummyInfection {
    core: InfectionCore,
}

impl DummyInfection {
    pub fn new(genotype: usize, start_day: u32) -> Self {
        let mut core = InfectionCore::new(genotype, start_day);
        core.density = INITIAL_DENSITY;
        Self { core }
    }
}

impl Infection for DummyInfection {
    fn core(&self) -> &InfectionCore {
        &self.core
    }

    fn update_density(&mut self, survival_factor: f64, _age_days: u32) -> bool {
        let growth = 8f64.sqrt();
        self.core.density = (self.core.density * growth * survival_factor).min(MAX_DENSITY);
        self.core.cumulative_exposure += self.core.density;
        self.core.density < MIN_DENSITY
    }
}

impl Checkpoint for DummyInfection {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.core.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            core: InfectionCore::read(reader)?,
        })
    }
}
