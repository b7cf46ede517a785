use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::Path,
};

use checkpoint::Checkpoint;
use host_core::{
    stat::Survey,
    within_host::{pathogenesis::MorbidityOutcome, WithinHostState},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Poisson};
use rayon::prelude::*;

use crate::config::CohortConfig;

/// One simulated person: within-host state plus its own random stream.
#[derive(Debug, Clone)]
pub struct Host {
    id: u64,
    /// age at the start of the run, in days
    initial_age_days: u32,
    state: WithinHostState,
    last_outcome: MorbidityOutcome,
    rng: ChaCha12Rng,
}

impl Host {
    fn new(id: u64, config: &CohortConfig) -> Self {
        let mut rng = ChaCha12Rng::seed_from_u64(config.seed ^ id);
        let age_years = rng.gen_range(config.min_age..config.max_age);
        let state = WithinHostState::new(&config.within_host, &mut rng);
        Self {
            id,
            initial_age_days: (age_years * 365.0) as u32,
            state,
            last_outcome: MorbidityOutcome::None,
            rng,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> &WithinHostState {
        &self.state
    }

    pub fn age_years(&self, day: u32) -> f64 {
        (self.initial_age_days + day) as f64 / 365.0
    }

    fn step(
        &mut self,
        day: u32,
        config: &CohortConfig,
        inoculations: Option<&Poisson<f64>>,
    ) -> anyhow::Result<()> {
        let age_years = self.age_years(day);
        let body_mass = config.body_mass(age_years);
        let new_infections = inoculations.map_or(0, |p| p.sample(&mut self.rng) as usize);
        let mut pathogenesis = config.pathogenesis.clone();
        self.last_outcome = self.state.update(
            new_infections,
            age_years,
            1.0,
            body_mass,
            &config.within_host,
            &mut pathogenesis,
            &mut self.rng,
        );
        if let (true, Some(schedule)) = (self.last_outcome.is_sick(), &config.treatment) {
            self.state
                .treatment(schedule, body_mass, &config.within_host, &mut self.rng)?;
        }
        Ok(())
    }

    fn survey(&self, day: u32, config: &CohortConfig) -> Survey {
        let mut survey = Survey::new(day, config.age_groups.len());
        let group = config.age_groups.group(self.age_years(day));
        self.state.summarize(&mut survey, group, &config.within_host);
        survey.report_morbidity(group, self.last_outcome);
        survey
    }
}

impl Checkpoint for Host {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.id.write(writer)?;
        self.initial_age_days.write(writer)?;
        self.state.write(writer)?;
        checkpoint::write_value(writer, &self.last_outcome)?;
        checkpoint::write_value(writer, &self.rng)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            id: u64::read(reader)?,
            initial_age_days: u32::read(reader)?,
            state: WithinHostState::read(reader)?,
            last_outcome: checkpoint::read_value(reader)?,
            rng: checkpoint::read_value(reader)?,
        })
    }
}

/// A population of independent hosts advanced together one day at a time.
#[derive(Debug, Clone)]
pub struct Cohort {
    day: u32,
    hosts: Vec<Host>,
}

impl Cohort {
    pub fn new(config: &CohortConfig) -> Self {
        let hosts = (0..config.n_hosts as u64)
            .map(|id| Host::new(id, config))
            .collect();
        Self { day: 0, hosts }
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn step(&mut self, config: &CohortConfig) -> anyhow::Result<()> {
        let inoculations = if config.inoculation_rate > 0.0 {
            Some(Poisson::new(config.inoculation_rate)?)
        } else {
            None
        };
        let day = self.day;
        self.hosts
            .par_iter_mut()
            .try_for_each(|h| h.step(day, config, inoculations.as_ref()))?;
        self.day += 1;
        Ok(())
    }

    /// Survey of every host's state after the last step.
    pub fn survey(&self, config: &CohortConfig) -> Survey {
        let day = self.day;
        self.hosts
            .par_iter()
            .map(|h| h.survey(day, config))
            .reduce(
                || Survey::new(day, config.age_groups.len()),
                |a, b| a.merge(&b),
            )
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Ok(Self::read(&mut reader)?)
    }
}

impl Checkpoint for Cohort {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.day.write(writer)?;
        self.hosts.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            day: u32::read(reader)?,
            hosts: Vec::read(reader)?,
        })
    }
}
