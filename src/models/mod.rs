pub mod three_compartment;

use serde::{Deserialize, Serialize};

pub use three_compartment::{CompartmentState, ModelState};

// Covariate model constants (three-compartment model with effect site).
const THETA_V1: f64 = 3.57;
const THETA_V2: f64 = 11.3;
const THETA_V3: f64 = 27.2;
const THETA_V2_WT: f64 = 1.03;
const THETA_V3_WT: f64 = 1.10;
const THETA_CL: f64 = 0.401;
const THETA_V1_SEX: f64 = 0.308;
const THETA_V2_AGE: f64 = 0.146;
const THETA_CL_ASA: f64 = -0.184;
const ALLOMETRIC_EXPONENT: f64 = 0.75;
const Q2_CL_RATIO: f64 = 0.8;
const Q3_CL_RATIO: f64 = 0.3;

/// Reference covariates the model is normalised to.
pub const REFERENCE_WEIGHT: f64 = 67.3;
pub const REFERENCE_AGE: f64 = 54.0;

/// Effect-site equilibration constant (1/min) of the fixed reference model.
pub const REFERENCE_KE0: f64 = 0.12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Indicator used by the covariate model (male = 0, female = 1).
    pub fn indicator(self) -> f64 {
        match self {
            Sex::Male => 0.0,
            Sex::Female => 1.0,
        }
    }
}

/// ASA physical status collapsed to a binary risk class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsaClass {
    /// ASA I-II
    Low,
    /// ASA III-IV
    High,
}

impl AsaClass {
    pub fn indicator(self) -> f64 {
        match self {
            AsaClass::Low => 0.0,
            AsaClass::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientCovariates {
    pub id: String,
    pub age: f64,    // years
    pub weight: f64, // kg
    pub height: f64, // cm
    pub sex: Sex,
    pub asa: AsaClass,
}

impl PatientCovariates {
    pub fn bmi(&self) -> f64 {
        let height_m = self.height / 100.0;
        self.weight / (height_m * height_m)
    }
}

/// Source of the patient-specific effect-site equilibration constant.
///
/// The estimation method is opaque to the engine; it only needs a value in
/// 1/min for a given patient.
pub trait Ke0Model {
    fn ke0(&self, patient: &PatientCovariates) -> f64;
}

/// Oracle returning the same ke0 for every patient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedKe0(pub f64);

impl Default for FixedKe0 {
    fn default() -> Self {
        Self(REFERENCE_KE0)
    }
}

impl Ke0Model for FixedKe0 {
    fn ke0(&self, _patient: &PatientCovariates) -> f64 {
        self.0
    }
}

impl<F> Ke0Model for F
where
    F: Fn(&PatientCovariates) -> f64,
{
    fn ke0(&self, patient: &PatientCovariates) -> f64 {
        self(patient)
    }
}

/// Compartmental parameters of one patient. Volumes in L, clearances in L/min.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PKParameters {
    pub v1: f64,
    pub v2: f64,
    pub v3: f64,
    pub cl: f64,
    pub q2: f64,
    pub q3: f64,
    pub ke0: f64,
}

impl PKParameters {
    pub fn from_covariates<K: Ke0Model + ?Sized>(
        patient: &PatientCovariates,
        ke0_model: &K,
    ) -> Self {
        let weight_ratio = patient.weight / REFERENCE_WEIGHT;
        let age_ratio = patient.age / REFERENCE_AGE;

        let v1 = THETA_V1
            * weight_ratio.powf(ALLOMETRIC_EXPONENT)
            * (1.0 + THETA_V1_SEX * patient.sex.indicator());
        let v2 = THETA_V2
            * weight_ratio.powf(THETA_V2_WT)
            * (1.0 + THETA_V2_AGE * (age_ratio - 1.0));
        let v3 = THETA_V3 * weight_ratio.powf(THETA_V3_WT);
        let cl = THETA_CL
            * weight_ratio.powf(ALLOMETRIC_EXPONENT)
            * (1.0 + THETA_CL_ASA * patient.asa.indicator());

        Self {
            v1,
            v2,
            v3,
            cl,
            q2: Q2_CL_RATIO * cl,
            q3: Q3_CL_RATIO * cl,
            ke0: ke0_model.ke0(patient),
        }
    }

    /// Always derived from the current volumes and clearances, never stored.
    pub fn rate_constants(&self) -> RateConstants {
        RateConstants {
            k10: self.cl / self.v1,
            k12: self.q2 / self.v1,
            k21: self.q2 / self.v2,
            k13: self.q3 / self.v1,
            k31: self.q3 / self.v3,
        }
    }
}

/// First-order micro rate constants (1/min).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateConstants {
    pub k10: f64,
    pub k12: f64,
    pub k21: f64,
    pub k13: f64,
    pub k31: f64,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn reference_patient() -> PatientCovariates {
        PatientCovariates {
            id: "REF-001".to_string(),
            age: REFERENCE_AGE,
            weight: REFERENCE_WEIGHT,
            height: 170.0,
            sex: Sex::Male,
            asa: AsaClass::Low,
        }
    }

    #[test]
    fn test_reference_patient_gets_typical_values() {
        let params = PKParameters::from_covariates(&reference_patient(), &FixedKe0::default());
        assert_relative_eq!(params.v1, 3.57, epsilon = 1e-12);
        assert_relative_eq!(params.v2, 11.3, epsilon = 1e-12);
        assert_relative_eq!(params.v3, 27.2, epsilon = 1e-12);
        assert_relative_eq!(params.cl, 0.401, epsilon = 1e-12);
        assert_relative_eq!(params.q2, 0.3208, epsilon = 1e-12);
        assert_relative_eq!(params.q3, 0.1203, epsilon = 1e-12);
        assert_relative_eq!(params.ke0, 0.12);
    }

    #[test]
    fn test_covariate_effects() {
        let mut patient = reference_patient();
        patient.sex = Sex::Female;
        patient.asa = AsaClass::High;
        patient.age = 81.0;
        let params = PKParameters::from_covariates(&patient, &FixedKe0::default());

        assert_relative_eq!(params.v1, 3.57 * 1.308, epsilon = 1e-12);
        assert_relative_eq!(params.v2, 11.3 * (1.0 + 0.146 * 0.5), epsilon = 1e-12);
        assert_relative_eq!(params.cl, 0.401 * (1.0 - 0.184), epsilon = 1e-12);
        assert_relative_eq!(params.q2, 0.8 * params.cl, epsilon = 1e-12);
    }

    #[test]
    fn test_heavier_patient_scales_allometrically() {
        let mut patient = reference_patient();
        patient.weight = 2.0 * REFERENCE_WEIGHT;
        let params = PKParameters::from_covariates(&patient, &FixedKe0::default());
        assert_relative_eq!(params.v1, 3.57 * 2f64.powf(0.75), epsilon = 1e-12);
        assert_relative_eq!(params.v3, 27.2 * 2f64.powf(1.10), epsilon = 1e-12);
    }

    #[test]
    fn test_ke0_oracle_receives_patient() {
        let oracle = |p: &PatientCovariates| 0.002 * p.age;
        let params = PKParameters::from_covariates(&reference_patient(), &oracle);
        assert_relative_eq!(params.ke0, 0.108, epsilon = 1e-12);
    }

    #[test]
    fn test_rate_constants_follow_parameters() {
        let mut params = PKParameters::from_covariates(&reference_patient(), &FixedKe0::default());
        let k = params.rate_constants();
        assert_relative_eq!(k.k10, 0.401 / 3.57, epsilon = 1e-12);
        assert_relative_eq!(k.k21, 0.3208 / 11.3, epsilon = 1e-12);
        assert_relative_eq!(k.k31, 0.1203 / 27.2, epsilon = 1e-12);

        params.cl *= 2.0;
        assert_relative_eq!(params.rate_constants().k10, 2.0 * k.k10, epsilon = 1e-12);
    }

    #[test]
    fn test_bmi() {
        let patient = reference_patient();
        assert_relative_eq!(patient.bmi(), 67.3 / (1.7 * 1.7), epsilon = 1e-12);
    }
}
