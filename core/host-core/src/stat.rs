use crate::within_host::pathogenesis::MorbidityOutcome;

use std::{
    fs::File,
    ops::{Index, IndexMut},
    path::Path,
};

use arrow2::{
    array::{Float64Vec, MutableArray, UInt32Vec},
    chunk::Chunk,
    datatypes::{DataType, Field, Schema},
    io::ipc::write::{Compression, FileWriter, WriteOptions},
};
use serde::{Deserialize, Serialize};
use strum::{EnumCount, IntoEnumIterator};

/// Index of an age group in a [`Survey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgeGroup(usize);

impl AgeGroup {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Age groups given by their upper bounds in years. Ages at or above the last
/// bound fall into one more, open-ended group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeGroups {
    upper_bounds: Vec<f64>,
}

impl Default for AgeGroups {
    fn default() -> Self {
        Self::new(vec![1.0, 5.0, 15.0, 25.0, 45.0, 65.0])
    }
}

impl AgeGroups {
    pub fn new(mut upper_bounds: Vec<f64>) -> Self {
        upper_bounds.sort_by(f64::total_cmp);
        Self { upper_bounds }
    }

    pub fn len(&self) -> usize {
        self.upper_bounds.len() + 1
    }

    pub fn group(&self, age_years: f64) -> AgeGroup {
        AgeGroup(self.upper_bounds.partition_point(|b| *b <= age_years))
    }
}

#[derive(Clone, Default, Debug, PartialEq, Serialize)]
pub struct MorbidityCount([u32; MorbidityOutcome::COUNT]);

impl MorbidityCount {
    pub fn n_sick(&self) -> u32 {
        MorbidityOutcome::iter()
            .filter(MorbidityOutcome::is_sick)
            .map(|o| self[&o])
            .sum()
    }
}

impl<'a> Index<&'a MorbidityOutcome> for MorbidityCount {
    type Output = u32;

    fn index(&self, index: &'a MorbidityOutcome) -> &Self::Output {
        &self.0[*index as usize]
    }
}

impl<'a> IndexMut<&'a MorbidityOutcome> for MorbidityCount {
    fn index_mut(&mut self, index: &MorbidityOutcome) -> &mut Self::Output {
        &mut self.0[*index as usize]
    }
}

/// Counts of one age group in one survey.
#[derive(Clone, Default, Debug, PartialEq, Serialize)]
pub struct AgeGroupStat {
    pub infected_hosts: u32,
    pub infections: u32,
    pub patent_infections: u32,
    pub patent_hosts: u32,
    /// sum over patent hosts of ln(total density)
    pub sum_log_density: f64,
    pub morbidity: MorbidityCount,
}

impl AgeGroupStat {
    fn merge(&mut self, other: &Self) {
        self.infected_hosts += other.infected_hosts;
        self.infections += other.infections;
        self.patent_infections += other.patent_infections;
        self.patent_hosts += other.patent_hosts;
        self.sum_log_density += other.sum_log_density;
        for o in MorbidityOutcome::iter() {
            self.morbidity[&o] += other.morbidity[&o];
        }
    }

    /// Geometric mean density of patent hosts.
    pub fn geometric_mean_density(&self) -> Option<f64> {
        (self.patent_hosts > 0).then(|| (self.sum_log_density / self.patent_hosts as f64).exp())
    }
}

/// Host counts collected on one day, per age group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Survey {
    day: u32,
    groups: Vec<AgeGroupStat>,
}

impl Survey {
    pub fn new(day: u32, n_groups: usize) -> Self {
        Self {
            day,
            groups: vec![AgeGroupStat::default(); n_groups],
        }
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn group(&self, group: AgeGroup) -> &AgeGroupStat {
        &self.groups[group.0]
    }

    pub fn report_infected_hosts(&mut self, group: AgeGroup, n: u32) {
        self.groups[group.0].infected_hosts += n;
    }

    pub fn add_to_infections(&mut self, group: AgeGroup, n: u32) {
        self.groups[group.0].infections += n;
    }

    pub fn add_to_patent_infections(&mut self, group: AgeGroup, n: u32) {
        self.groups[group.0].patent_infections += n;
    }

    pub fn report_patent_hosts(&mut self, group: AgeGroup, n: u32) {
        self.groups[group.0].patent_hosts += n;
    }

    pub fn add_to_log_density(&mut self, group: AgeGroup, v: f64) {
        self.groups[group.0].sum_log_density += v;
    }

    pub fn report_morbidity(&mut self, group: AgeGroup, outcome: MorbidityOutcome) {
        self.groups[group.0].morbidity[&outcome] += 1;
    }

    /// Adds the counts of a survey taken on the same day over other hosts.
    pub fn merge(mut self, other: &Survey) -> Self {
        for (g, o) in self.groups.iter_mut().zip(&other.groups) {
            g.merge(o);
        }
        self
    }

    pub fn total(&self) -> AgeGroupStat {
        self.groups.iter().fold(AgeGroupStat::default(), |mut acc, g| {
            acc.merge(g);
            acc
        })
    }
}

/// Column-wise record of all-age survey totals.
#[derive(Debug)]
pub struct SurveySeries {
    day: UInt32Vec,
    infected_hosts: UInt32Vec,
    infections: UInt32Vec,
    patent_infections: UInt32Vec,
    patent_hosts: UInt32Vec,
    geometric_mean_density: Float64Vec,
    morbidity: Vec<UInt32Vec>,
}

impl Default for SurveySeries {
    fn default() -> Self {
        Self {
            day: UInt32Vec::new(),
            infected_hosts: UInt32Vec::new(),
            infections: UInt32Vec::new(),
            patent_infections: UInt32Vec::new(),
            patent_hosts: UInt32Vec::new(),
            geometric_mean_density: Float64Vec::new(),
            morbidity: (0..MorbidityOutcome::COUNT)
                .map(|_| UInt32Vec::new())
                .collect(),
        }
    }
}

impl SurveySeries {
    pub fn push(&mut self, survey: &Survey) {
        let total = survey.total();
        self.day.push(Some(survey.day));
        self.infected_hosts.push(Some(total.infected_hosts));
        self.infections.push(Some(total.infections));
        self.patent_infections.push(Some(total.patent_infections));
        self.patent_hosts.push(Some(total.patent_hosts));
        self.geometric_mean_density.push(total.geometric_mean_density());
        for (col, o) in self.morbidity.iter_mut().zip(MorbidityOutcome::iter()) {
            col.push(Some(total.morbidity[&o]));
        }
    }

    pub fn len(&self) -> usize {
        self.day.len()
    }

    pub fn is_empty(&self) -> bool {
        self.day.is_empty()
    }

    pub fn export(&mut self, path: &Path) -> anyhow::Result<()> {
        let mut fields = [
            "day",
            "infected_hosts",
            "infections",
            "patent_infections",
            "patent_hosts",
        ]
        .into_iter()
        .map(|name| Field::new(name, DataType::UInt32, false))
        .collect::<Vec<_>>();
        fields.push(Field::new("geometric_mean_density", DataType::Float64, true));
        fields.extend(
            MorbidityOutcome::iter().map(|o| Field::new(o.to_string(), DataType::UInt32, false)),
        );

        let mut columns = vec![
            self.day.as_box(),
            self.infected_hosts.as_box(),
            self.infections.as_box(),
            self.patent_infections.as_box(),
            self.patent_hosts.as_box(),
            self.geometric_mean_density.as_box(),
        ];
        columns.extend(self.morbidity.iter_mut().map(|v| v.as_box()));

        let chunk = Chunk::try_new(columns)?;
        let mut writer = FileWriter::try_new(
            File::create(path)?,
            Schema::from(fields),
            None,
            WriteOptions {
                compression: Some(Compression::ZSTD),
            },
        )?;
        writer.write(&chunk, None)?;
        writer.finish()?;
        Ok(())
    }
}
