pub mod drug;

use std::io;

use checkpoint::Checkpoint;

use self::drug::{Drug, DrugType};
use crate::{util::random::RandomSource, within_host::commons::ParamsError};

/// The drugs present in one host, in order of first administration.
///
/// A [`Drug`] is created the first time its type is given and kept for the
/// rest of the host's life.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PkPdModel {
    drugs: Vec<Drug>,
}

impl PkPdModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drugs(&self) -> &[Drug] {
        &self.drugs
    }

    pub fn medicate<R: RandomSource + ?Sized>(
        &mut self,
        abbreviation: &str,
        qty: f64,
        time: f64,
        drug_types: &[DrugType],
        rng: &mut R,
    ) -> Result<(), ParamsError> {
        let type_index = drug_types
            .iter()
            .position(|d| d.abbreviation == abbreviation)
            .ok_or_else(|| ParamsError::UnknownDrug(abbreviation.to_string()))?;
        let i = match self.drugs.iter().position(|d| d.type_index() == type_index) {
            Some(i) => i,
            None => {
                self.drugs
                    .push(Drug::new(type_index, &drug_types[type_index], rng));
                self.drugs.len() - 1
            }
        };
        self.drugs[i].medicate(time, qty);
        Ok(())
    }

    /// Combined survival factor of all drugs for one infection over today.
    pub fn drug_factor(&self, genotype: usize, body_mass: f64, drug_types: &[DrugType]) -> f64 {
        self.drugs
            .iter()
            .map(|d| d.calculate_drug_factor(genotype, body_mass, &drug_types[d.type_index()]))
            .product()
    }

    /// Ends the day for every drug. Must follow all of today's drug factor queries.
    pub fn decay_drugs(&mut self, body_mass: f64, drug_types: &[DrugType]) {
        for d in &mut self.drugs {
            d.update_concentration(body_mass, &drug_types[d.type_index()]);
        }
    }

    pub fn concentration(&self, abbreviation: &str, drug_types: &[DrugType]) -> f64 {
        self.drugs
            .iter()
            .find(|d| drug_types[d.type_index()].abbreviation == abbreviation)
            .map_or(0.0, |d| d.concentration())
    }
}

impl Checkpoint for PkPdModel {
    fn write<W: io::Write>(&self, writer: &mut W) -> checkpoint::Result<()> {
        self.drugs.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> checkpoint::Result<Self> {
        Ok(Self {
            drugs: Vec::read(reader)?,
        })
    }
}
