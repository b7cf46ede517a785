pub mod dummy;
pub mod molineaux;

use std::io;

use checkpoint::Checkpoint;

use self::{dummy::DummyInfection, molineaux::MolineauxInfection};
use super::commons::{ImmunityParams, InfectionModelKind, WithinHostParams};
use crate::util::random::RandomSource;

/// State shared by every infection model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfectionCore {
    pub(crate) genotype: usize,
    /// simulation day on which the infection started
    pub(crate) start_day: u32,
    /// parasites per microlitre
    pub(crate) density: f64,
    pub(crate) cumulative_exposure: f64,
}

impl InfectionCore {
    pub fn new(genotype: usize, start_day: u32) -> Self {
        Self {
            genotype,
            start_day,
            density: 0.0,
            cumulative_exposure: 0.0,
        }
    }
}

impl Checkpoint for InfectionCore {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.genotype.write(writer)?;
        self.start_day.write(writer)?;
        self.density.write(writer)?;
        self.cumulative_exposure.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            genotype: usize::read(reader)?,
            start_day: u32::read(reader)?,
            density: f64::read(reader)?,
            cumulative_exposure: f64::read(reader)?,
        })
    }
}

pub trait Infection {
    fn core(&self) -> &InfectionCore;

    /// Advances one day. `age_days` is 0 on the day the infection starts.
    ///
    /// Returns true when the infection has gone extinct and must be removed.
    fn update_density(&mut self, survival_factor: f64, age_days: u32) -> bool;

    fn density(&self) -> f64 {
        self.core().density
    }

    fn cumulative_exposure(&self) -> f64 {
        self.core().cumulative_exposure
    }

    fn genotype(&self) -> usize {
        self.core().genotype
    }

    fn start_day(&self) -> u32 {
        self.core().start_day
    }

    /// Survival factor from the host's acquired and maternal immunity.
    ///
    /// `cumulative_h` is the number of infections the host has had and
    /// `cumulative_y` its cumulative parasite exposure, both taken before this
    /// step's contributions.
    fn immunity_survival_factor(
        &self,
        age_years: f64,
        cumulative_h: f64,
        cumulative_y: f64,
        ip: &ImmunityParams,
    ) -> f64 {
        // effects of cumulative density (dy) and of the number of infections (dh)
        let (dy, dh) = if cumulative_h <= 1.0 {
            (1.0, 1.0)
        } else {
            (
                1.0 / (1.0 + (cumulative_y - self.cumulative_exposure()) / ip.cumulative_y_star),
                1.0 / (1.0 + (cumulative_h - 1.0) / ip.cumulative_h_star),
            )
        };
        // maternal immunity
        let da = 1.0 - ip.alpha_m * (-ip.decay_m * age_years).exp();
        (dy * dh * da).min(1.0)
    }
}

/// One infection of whichever model the host was configured with.
#[derive(Debug, Clone, PartialEq)]
pub enum InfectionModel {
    Molineaux(Box<MolineauxInfection>),
    Dummy(DummyInfection),
}

impl InfectionModel {
    const MOLINEAUX_TAG: u8 = 0;
    const DUMMY_TAG: u8 = 1;

    pub fn new<R: RandomSource + ?Sized>(
        genotype: usize,
        start_day: u32,
        params: &WithinHostParams,
        rng: &mut R,
    ) -> Self {
        match params.infection_model {
            InfectionModelKind::Molineaux => Self::Molineaux(Box::new(MolineauxInfection::new(
                genotype,
                start_day,
                &params.molineaux,
                rng,
            ))),
            InfectionModelKind::Dummy => Self::Dummy(DummyInfection::new(genotype, start_day)),
        }
    }

    fn inner(&self) -> &dyn Infection {
        match self {
            Self::Molineaux(inf) => inf.as_ref(),
            Self::Dummy(inf) => inf,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Infection {
        match self {
            Self::Molineaux(inf) => inf.as_mut(),
            Self::Dummy(inf) => inf,
        }
    }
}

impl Infection for InfectionModel {
    fn core(&self) -> &InfectionCore {
        self.inner().core()
    }

    fn update_density(&mut self, survival_factor: f64, age_days: u32) -> bool {
        self.inner_mut().update_density(survival_factor, age_days)
    }

    fn immunity_survival_factor(
        &self,
        age_years: f64,
        cumulative_h: f64,
        cumulative_y: f64,
        ip: &ImmunityParams,
    ) -> f64 {
        self.inner()
            .immunity_survival_factor(age_years, cumulative_h, cumulative_y, ip)
    }
}

impl Checkpoint for InfectionModel {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        match self {
            Self::Molineaux(inf) => {
                checkpoint::write_tag(writer, Self::MOLINEAUX_TAG)?;
                inf.write(writer)
            }
            Self::Dummy(inf) => {
                checkpoint::write_tag(writer, Self::DUMMY_TAG)?;
                inf.write(writer)
            }
        }
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        match checkpoint::read_tag(reader)? {
            Self::MOLINEAUX_TAG => Ok(Self::Molineaux(Box::new(MolineauxInfection::read(
                reader,
            )?))),
            Self::DUMMY_TAG => Ok(Self::Dummy(DummyInfection::read(reader)?)),
            tag => Err(checkpoint::Error::UnknownTag {
                tag,
                kind: "infection",
            }),
        }
    }
}
