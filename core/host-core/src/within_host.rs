pub mod commons;
pub mod infection;
pub mod pathogenesis;

use std::io;

use checkpoint::Checkpoint;
use serde::{Deserialize, Serialize};

use self::{
    commons::{ParamsError, WithinHostParams},
    infection::{Infection, InfectionModel},
    pathogenesis::{MorbidityOutcome, PathogenesisModel},
};
use crate::{
    pkpd::PkPdModel,
    stat::{AgeGroup, Survey},
    util::random::RandomSource,
};

/// Maximum number of concurrent infections in one host.
pub const MAX_INFECTIONS: usize = 21;

/// One dose of a treatment course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledDose {
    pub drug: String,
    pub mg_per_kg: f64,
    /// days after the start of treatment
    #[serde(default)]
    pub day: u32,
    /// time within that day, in days
    #[serde(default)]
    pub time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreatmentSchedule {
    pub doses: Vec<ScheduledDose>,
}

/// A dose of a started course that is due on a later day.
#[derive(Debug, Clone, PartialEq)]
struct HeldDose {
    drug: String,
    qty: f64,
    days_ahead: u32,
    time: f64,
}

impl Checkpoint for HeldDose {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.drug.write(writer)?;
        self.qty.write(writer)?;
        self.days_ahead.write(writer)?;
        self.time.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            drug: String::read(reader)?,
            qty: f64::read(reader)?,
            days_ahead: u32::read(reader)?,
            time: f64::read(reader)?,
        })
    }
}

/// Parasites, immunity and drugs of one host.
#[derive(Debug, Clone, PartialEq)]
pub struct WithinHostState {
    infections: Vec<InfectionModel>,
    pkpd: PkPdModel,
    held_doses: Vec<HeldDose>,
    innate_survival_factor: f64,
    /// number of infections experienced, decayed
    cumulative_h: f64,
    /// cumulative parasite density, decayed
    cumulative_y: f64,
    cumulative_y_lag: f64,
    total_density: f64,
    /// highest single-infection density of the last step
    step_max_density: f64,
    /// number of steps taken
    day: u32,
}

impl WithinHostState {
    pub fn new<R: RandomSource + ?Sized>(params: &WithinHostParams, rng: &mut R) -> Self {
        Self {
            infections: Vec::new(),
            pkpd: PkPdModel::new(),
            held_doses: Vec::new(),
            innate_survival_factor: (-rng.gaussian(0.0, params.immunity.sigma_i())).exp(),
            cumulative_h: 0.0,
            cumulative_y: 0.0,
            cumulative_y_lag: 0.0,
            total_density: 0.0,
            step_max_density: 0.0,
            day: 0,
        }
    }

    /// Advances the host by one day and classifies its morbidity.
    ///
    /// `vaccine_survival_factor` is the blood-stage vaccine's effect on
    /// parasite survival (1 without a vaccine).
    #[allow(clippy::too_many_arguments)]
    pub fn update<R, P>(
        &mut self,
        new_infections: usize,
        age_years: f64,
        vaccine_survival_factor: f64,
        body_mass: f64,
        params: &WithinHostParams,
        pathogenesis: &mut P,
        rng: &mut R,
    ) -> MorbidityOutcome
    where
        R: RandomSource + ?Sized,
        P: PathogenesisModel + ?Sized,
    {
        let added = self.add_infections(new_infections, params, rng);
        if added < new_infections {
            tracing::debug!(
                "dropped {} new infections at the cap of {}",
                new_infections - added,
                MAX_INFECTIONS
            );
        }
        self.cumulative_h += added as f64;
        self.update_immune_status(params);

        let host_factor = vaccine_survival_factor * self.innate_survival_factor;
        let (h, y) = (self.cumulative_h, self.cumulative_y);
        let day = self.day;
        let pkpd = &self.pkpd;
        let mut total = 0.0;
        let mut step_max = 0.0f64;
        self.infections.retain_mut(|inf| {
            let survival_factor = host_factor
                * pkpd.drug_factor(inf.genotype(), body_mass, &params.drugs)
                * inf.immunity_survival_factor(age_years, h, y, &params.immunity);
            let extinct = inf.update_density(survival_factor, day - inf.start_day());
            if !extinct {
                total += inf.density();
                step_max = step_max.max(inf.density());
            }
            !extinct
        });
        self.total_density = total;
        self.step_max_density = step_max;
        self.cumulative_y += total;

        self.pkpd.decay_drugs(body_mass, &params.drugs);
        let outcome = pathogenesis.determine_morbidity(age_years, step_max, total);
        self.day += 1;
        self.give_held_doses(params, rng);
        outcome
    }

    fn add_infections<R: RandomSource + ?Sized>(
        &mut self,
        n: usize,
        params: &WithinHostParams,
        rng: &mut R,
    ) -> usize {
        let n = n.min(MAX_INFECTIONS - self.infections.len());
        for _ in 0..n {
            let genotype = Self::sample_genotype(params, rng);
            self.infections
                .push(InfectionModel::new(genotype, self.day, params, rng));
        }
        n
    }

    fn sample_genotype<R: RandomSource + ?Sized>(params: &WithinHostParams, rng: &mut R) -> usize {
        let freqs = &params.genotype_frequencies;
        if freqs.len() <= 1 {
            return 0;
        }
        let u = rng.uniform_01();
        let mut acc = 0.0;
        for (i, f) in freqs.iter().enumerate() {
            acc += f;
            if u < acc {
                return i;
            }
        }
        freqs.len() - 1
    }

    fn update_immune_status(&mut self, params: &WithinHostParams) {
        let ip = &params.immunity;
        let effector_remain = ip.immune_effector_remain();
        if effector_remain < 1.0 {
            self.cumulative_h *= effector_remain;
            self.cumulative_y *= effector_remain;
        }
        let asex_remain = ip.asexual_immunity_remain();
        if asex_remain < 1.0 {
            self.cumulative_h *= asex_remain
                / (1.0 + self.cumulative_h * (1.0 - asex_remain) / ip.cumulative_h_star);
            self.cumulative_y *= asex_remain
                / (1.0 + self.cumulative_y * (1.0 - asex_remain) / ip.cumulative_y_star);
        }
        self.cumulative_y_lag = self.cumulative_y;
    }

    /// Adds one infection from outside the transmission model, unless the host
    /// is at the cap.
    pub fn import_infection<R: RandomSource + ?Sized>(
        &mut self,
        params: &WithinHostParams,
        rng: &mut R,
    ) {
        if self.add_infections(1, params, rng) == 1 {
            self.cumulative_h += 1.0;
        }
    }

    /// Removes every infection together with its share of the densities.
    pub fn clear_infections(&mut self) {
        self.infections.clear();
        self.total_density = 0.0;
        self.step_max_density = 0.0;
    }

    /// Gives `qty` mg of a drug `time` days into today.
    pub fn medicate<R: RandomSource + ?Sized>(
        &mut self,
        drug: &str,
        qty: f64,
        time: f64,
        params: &WithinHostParams,
        rng: &mut R,
    ) -> Result<(), ParamsError> {
        self.pkpd.medicate(drug, qty, time, &params.drugs, rng)
    }

    /// Starts a treatment course. Today's doses are given at once, later ones
    /// are held until their day. Nothing is given if the schedule names an
    /// unknown drug.
    pub fn treatment<R: RandomSource + ?Sized>(
        &mut self,
        schedule: &TreatmentSchedule,
        body_mass: f64,
        params: &WithinHostParams,
        rng: &mut R,
    ) -> Result<(), ParamsError> {
        for dose in &schedule.doses {
            params.drug_index(&dose.drug)?;
        }
        for dose in &schedule.doses {
            let qty = dose.mg_per_kg * body_mass;
            if dose.day == 0 {
                self.medicate(&dose.drug, qty, dose.time, params, rng)?;
            } else {
                self.held_doses.push(HeldDose {
                    drug: dose.drug.clone(),
                    qty,
                    days_ahead: dose.day,
                    time: dose.time,
                });
            }
        }
        Ok(())
    }

    fn give_held_doses<R: RandomSource + ?Sized>(&mut self, params: &WithinHostParams, rng: &mut R) {
        let mut due = Vec::new();
        self.held_doses.retain_mut(|d| {
            d.days_ahead -= 1;
            if d.days_ahead == 0 {
                due.push((d.drug.clone(), d.qty, d.time));
                false
            } else {
                true
            }
        });
        for (drug, qty, time) in due {
            // drugs were checked when the course started
            if let Err(e) = self.medicate(&drug, qty, time, params, rng) {
                tracing::warn!("skipped held dose: {}", e);
            }
        }
    }

    /// Rolls back the cumulative exposure gained since the last update.
    pub fn immunity_penalisation(&mut self, params: &WithinHostParams) {
        let penalty = params.immunity.penalty();
        self.cumulative_y = (self.cumulative_y_lag
            - penalty * (self.cumulative_y - self.cumulative_y_lag))
            .max(0.0);
    }

    /// Loses all acquired immunity.
    pub fn immune_suppression(&mut self) {
        self.cumulative_h = 0.0;
        self.cumulative_y = 0.0;
        self.cumulative_y_lag = 0.0;
    }

    /// (all infections, infections above the detection limit)
    pub fn count_infections(&self, params: &WithinHostParams) -> (usize, usize) {
        let patent = self
            .infections
            .iter()
            .filter(|inf| inf.density() > params.detection_limit)
            .count();
        (self.infections.len(), patent)
    }

    pub fn parasite_density_detectible(&self, params: &WithinHostParams) -> bool {
        self.total_density > params.detection_limit
    }

    /// Reports this host into `survey` and returns whether it is patent.
    pub fn summarize(
        &self,
        survey: &mut Survey,
        age_group: AgeGroup,
        params: &WithinHostParams,
    ) -> bool {
        let (n, patent) = self.count_infections(params);
        if n > 0 {
            survey.report_infected_hosts(age_group, 1);
            survey.add_to_infections(age_group, n as u32);
            survey.add_to_patent_infections(age_group, patent as u32);
        }
        if self.parasite_density_detectible(params) {
            survey.report_patent_hosts(age_group, 1);
            survey.add_to_log_density(age_group, self.total_density.ln());
            return true;
        }
        false
    }

    pub fn infections(&self) -> &[InfectionModel] {
        &self.infections
    }

    pub fn pkpd(&self) -> &PkPdModel {
        &self.pkpd
    }

    pub fn total_density(&self) -> f64 {
        self.total_density
    }

    pub fn step_max_density(&self) -> f64 {
        self.step_max_density
    }

    pub fn innate_survival_factor(&self) -> f64 {
        self.innate_survival_factor
    }

    pub fn cumulative_h(&self) -> f64 {
        self.cumulative_h
    }

    pub fn cumulative_y(&self) -> f64 {
        self.cumulative_y
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

impl Checkpoint for WithinHostState {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.infections.write(writer)?;
        self.innate_survival_factor.write(writer)?;
        self.cumulative_h.write(writer)?;
        self.cumulative_y.write(writer)?;
        self.cumulative_y_lag.write(writer)?;
        self.step_max_density.write(writer)?;
        self.total_density.write(writer)?;
        self.pkpd.write(writer)?;
        self.held_doses.write(writer)?;
        self.day.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            infections: Vec::read(reader)?,
            innate_survival_factor: f64::read(reader)?,
            cumulative_h: f64::read(reader)?,
            cumulative_y: f64::read(reader)?,
            cumulative_y_lag: f64::read(reader)?,
            step_max_density: f64::read(reader)?,
            total_density: f64::read(reader)?,
            pkpd: PkPdModel::read(reader)?,
            held_doses: Vec::read(reader)?,
            day: u32::read(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ScheduledDose, TreatmentSchedule, WithinHostState, MAX_INFECTIONS};
    use crate::{
        pkpd::drug::{DrugType, PdParams},
        stat::{AgeGroups, Survey},
        within_host::{
            commons::{InfectionModelKind, ParamsError, WithinHostParams},
            infection::Infection,
            pathogenesis::{MorbidityOutcome, ThresholdPathogenesis},
        },
    };
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn params(kind: InfectionModelKind) -> WithinHostParams {
        WithinHostParams {
            infection_model: kind,
            drugs: vec![DrugType {
                abbreviation: "CQ".to_string(),
                elimination_rate: 0.02,
                neg_m_exponent: 0.0,
                vol_dist: 300.0,
                vol_dist_cv: 0.1,
                pd: vec![PdParams {
                    max_killing_rate: 3.45,
                    ic50: 0.02,
                    slope: 1.6,
                }],
            }],
            ..Default::default()
        }
    }

    fn step(
        host: &mut WithinHostState,
        n: usize,
        params: &WithinHostParams,
        rng: &mut ChaCha12Rng,
    ) -> MorbidityOutcome {
        host.update(n, 20.0, 1.0, 50.0, params, &mut ThresholdPathogenesis::default(), rng)
    }

    #[test]
    fn test_infection_cap() {
        let params = params(InfectionModelKind::Dummy);
        let rng = &mut ChaCha12Rng::seed_from_u64(0);
        let mut host = WithinHostState::new(&params, rng);
        host.innate_survival_factor = 1.0;
        step(&mut host, 5, &params, rng);
        step(&mut host, 30, &params, rng);
        assert_eq!(host.infections().len(), MAX_INFECTIONS);
        step(&mut host, 3, &params, rng);
        assert_eq!(host.infections().len(), MAX_INFECTIONS);
        assert_eq!(host.cumulative_h(), MAX_INFECTIONS as f64);

        host.import_infection(&params, rng);
        assert_eq!(host.infections().len(), MAX_INFECTIONS);
    }

    #[test]
    fn test_total_density_sums_live_infections() {
        let params = params(InfectionModelKind::Molineaux);
        let rng = &mut ChaCha12Rng::seed_from_u64(1);
        let mut host = WithinHostState::new(&params, rng);
        step(&mut host, 3, &params, rng);
        for _ in 0..60 {
            step(&mut host, 0, &params, rng);
            let sum = host.infections().iter().map(|i| i.density()).sum::<f64>();
            assert!((host.total_density() - sum).abs() <= 1e-9 * sum.max(1.0));
            let max = host
                .infections()
                .iter()
                .map(|i| i.density())
                .fold(0.0, f64::max);
            assert_eq!(host.step_max_density(), max);
        }
    }

    #[test]
    fn test_penalisation_floor() {
        let mut params = params(InfectionModelKind::Dummy);
        params.immunity.immunity_penalty = -2.0;
        let rng = &mut ChaCha12Rng::seed_from_u64(0);
        let mut host = WithinHostState::new(&params, rng);
        host.cumulative_y_lag = 1.0;
        host.cumulative_y = 100.0;
        host.immunity_penalisation(&params);
        assert_eq!(host.cumulative_y(), 0.0);

        host.cumulative_y_lag = 50.0;
        host.cumulative_y = 60.0;
        host.immunity_penalisation(&params);
        let expected = 50.0 - params.immunity.penalty() * 10.0;
        assert!((host.cumulative_y() - expected).abs() < 1e-12);

        host.immune_suppression();
        assert_eq!(host.cumulative_y(), 0.0);
        assert_eq!(host.cumulative_h(), 0.0);
    }

    #[test]
    fn test_immune_decay() {
        let mut params = params(InfectionModelKind::Dummy);
        params.immunity.immune_effector_decay = 0.1;
        params.immunity.asexual_immunity_decay = 0.1;
        let rng = &mut ChaCha12Rng::seed_from_u64(0);
        let mut host = WithinHostState::new(&params, rng);
        host.cumulative_h = 10.0;
        host.cumulative_y = 1.0e6;
        step(&mut host, 0, &params, rng);
        assert!(host.cumulative_h() < 10.0);
        assert!(host.cumulative_y() < 1.0e6);
        assert_eq!(host.cumulative_y_lag, host.cumulative_y());
    }

    #[test]
    fn test_patent_classification() {
        let params = params(InfectionModelKind::Dummy);
        let rng = &mut ChaCha12Rng::seed_from_u64(2);
        let mut host = WithinHostState::new(&params, rng);
        host.innate_survival_factor = 1.0;
        let groups = AgeGroups::default();
        let group = groups.group(20.0);

        let mut survey = Survey::new(0, groups.len());
        assert!(!host.summarize(&mut survey, group, &params));
        assert_eq!(survey.group(group).infected_hosts, 0);

        // 16 * sqrt(8) is above the default detection limit of 40
        step(&mut host, 2, &params, rng);
        assert!(host.parasite_density_detectible(&params));
        assert_eq!(host.count_infections(&params), (2, 2));
        let mut survey = Survey::new(1, groups.len());
        assert!(host.summarize(&mut survey, group, &params));
        let stat = survey.group(group);
        assert_eq!(
            (stat.infected_hosts, stat.infections, stat.patent_infections, stat.patent_hosts),
            (1, 2, 2, 1)
        );
        assert!((stat.sum_log_density - host.total_density().ln()).abs() < 1e-12);

        host.clear_infections();
        assert_eq!(host.count_infections(&params), (0, 0));
        assert_eq!(host.total_density(), 0.0);
        assert_eq!(host.step_max_density(), 0.0);
        assert!(!host.parasite_density_detectible(&params));
        let mut survey = Survey::new(2, groups.len());
        assert!(!host.summarize(&mut survey, group, &params));
        assert_eq!(survey.group(group).patent_hosts, 0);
        step(&mut host, 0, &params, rng);
        assert!(!host.parasite_density_detectible(&params));
    }

    #[test]
    fn test_morbidity_follows_density() {
        let params = params(InfectionModelKind::Dummy);
        let rng = &mut ChaCha12Rng::seed_from_u64(3);
        let mut host = WithinHostState::new(&params, rng);
        host.innate_survival_factor = 1.0;
        assert_eq!(step(&mut host, 1, &params, rng), MorbidityOutcome::None);
        let mut outcome = MorbidityOutcome::None;
        for _ in 0..10 {
            outcome = step(&mut host, 0, &params, rng);
        }
        // capped at 20000 parasites, above the pyrogenic threshold
        assert_eq!(outcome, MorbidityOutcome::Uncomplicated);
    }

    #[test]
    fn test_treatment_holds_later_doses() {
        let params = params(InfectionModelKind::Molineaux);
        let rng = &mut ChaCha12Rng::seed_from_u64(4);
        let mut host = WithinHostState::new(&params, rng);
        let schedule = TreatmentSchedule {
            doses: [(0, 10.0), (1, 10.0), (2, 5.0)]
                .into_iter()
                .map(|(day, mg_per_kg)| ScheduledDose {
                    drug: "CQ".to_string(),
                    mg_per_kg,
                    day,
                    time: 0.0,
                })
                .collect(),
        };
        host.treatment(&schedule, 50.0, &params, rng).unwrap();
        assert_eq!(host.pkpd().drugs()[0].doses(), &[(0.0, 500.0)]);
        step(&mut host, 0, &params, rng);
        assert_eq!(host.pkpd().drugs()[0].doses(), &[(0.0, 500.0)]);
        step(&mut host, 0, &params, rng);
        assert_eq!(host.pkpd().drugs()[0].doses(), &[(0.0, 250.0)]);
        step(&mut host, 0, &params, rng);
        assert!(host.pkpd().drugs()[0].doses().is_empty());

        let bad = TreatmentSchedule {
            doses: vec![
                ScheduledDose {
                    drug: "CQ".to_string(),
                    mg_per_kg: 10.0,
                    day: 0,
                    time: 0.0,
                },
                ScheduledDose {
                    drug: "XX".to_string(),
                    mg_per_kg: 10.0,
                    day: 0,
                    time: 0.0,
                },
            ],
        };
        assert_eq!(
            host.treatment(&bad, 50.0, &params, rng),
            Err(ParamsError::UnknownDrug("XX".to_string()))
        );
        assert!(host.pkpd().drugs()[0].doses().is_empty());
    }

    #[test]
    fn test_drug_clears_infection() {
        let params = params(InfectionModelKind::Dummy);
        let rng = &mut ChaCha12Rng::seed_from_u64(5);
        let mut host = WithinHostState::new(&params, rng);
        host.innate_survival_factor = 1.0;
        step(&mut host, 1, &params, rng);
        for day in 0..3 {
            host.medicate("CQ", 600.0, 0.0, &params, rng).unwrap();
            step(&mut host, 0, &params, rng);
            if host.infections().is_empty() {
                return;
            }
            assert!(day < 2, "infection survived treatment");
        }
    }

    #[test]
    fn test_checkpoint_continues_identically() {
        let params = params(InfectionModelKind::Molineaux);
        let rng = &mut ChaCha12Rng::seed_from_u64(6);
        let mut host = WithinHostState::new(&params, rng);
        for day in 0..40 {
            step(&mut host, usize::from(day % 9 == 0), &params, rng);
            if day == 20 {
                host.medicate("CQ", 300.0, 0.5, &params, rng).unwrap();
            }
        }
        let schedule = TreatmentSchedule {
            doses: vec![ScheduledDose {
                drug: "CQ".to_string(),
                mg_per_kg: 5.0,
                day: 3,
                time: 0.25,
            }],
        };
        host.treatment(&schedule, 50.0, &params, rng).unwrap();

        let bytes = checkpoint::to_bytes(&host).unwrap();
        let mut resumed: WithinHostState = checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(resumed, host);

        let mut rng_resumed = rng.clone();
        for day in 0..40 {
            let n = usize::from(day % 7 == 0);
            step(&mut host, n, &params, rng);
            step(&mut resumed, n, &params, &mut rng_resumed);
            assert_eq!(host.total_density().to_bits(), resumed.total_density().to_bits());
        }
        assert_eq!(resumed, host);
    }
}
