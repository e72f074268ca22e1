use crate::dosing::to_mg_per_min;
use crate::models::{Ke0Model, PKParameters, PatientCovariates, RateConstants};
use serde::{Deserialize, Serialize};

/// PK parameters bound to the body weight used for rate conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndividualModel {
    pub parameters: PKParameters,
    pub weight: f64,
}

impl IndividualModel {
    pub fn new(parameters: PKParameters, weight: f64) -> Self {
        Self { parameters, weight }
    }

    pub fn from_patient<K: Ke0Model + ?Sized>(patient: &PatientCovariates, ke0_model: &K) -> Self {
        Self::new(PKParameters::from_covariates(patient, ke0_model), patient.weight)
    }

    pub fn rate_constants(&self) -> RateConstants {
        self.parameters.rate_constants()
    }

    /// mg/kg/hr to mg/min for this patient.
    pub fn infusion_mg_per_min(&self, rate: f64) -> f64 {
        to_mg_per_min(rate, self.weight)
    }
}
