use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::dosing::{ThresholdSettings, DEFAULT_REDUCTION_FACTOR, DEFAULT_UPPER_THRESHOLD_RATIO};
use crate::error::{PKError, PKResult};
use crate::models::PatientCovariates;
use crate::simulation::{DEFAULT_TARGET_REACH_TIME, SIMULATION_DURATION};

pub const AGE_RANGE: (f64, f64) = (18.0, 80.0);
pub const WEIGHT_RANGE: (f64, f64) = (40.0, 120.0);
pub const BMI_RANGE: (f64, f64) = (16.0, 40.0);
pub const BOLUS_DOSE_RANGE: (f64, f64) = (1.0, 15.0);
pub const TARGET_CE_RANGE: (f64, f64) = (0.5, 3.0);

/// One protocol request: the patient, the bolus and the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolRequest {
    pub patient: PatientCovariates,
    pub bolus_dose: f64,      // mg
    pub target_ce: f64,       // ug/mL
    pub ke0: Option<f64>,     // 1/min, overrides the ke0 oracle when present
    #[serde(default)]
    pub options: ProtocolOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolOptions {
    pub target_reach_time: f64, // min
    pub upper_threshold_ratio: f64,
    pub reduction_factor: f64,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            target_reach_time: DEFAULT_TARGET_REACH_TIME,
            upper_threshold_ratio: DEFAULT_UPPER_THRESHOLD_RATIO,
            reduction_factor: DEFAULT_REDUCTION_FACTOR,
        }
    }
}

fn check_range(
    reasons: &mut Vec<String>,
    name: &str,
    value: f64,
    (lo, hi): (f64, f64),
    unit: &str,
) {
    if !(lo..=hi).contains(&value) {
        reasons.push(format!("{} {} outside {}-{} {}", name, value, lo, hi, unit));
    }
}

impl ProtocolRequest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> PKResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let request: ProtocolRequest = serde_json::from_str(&content)?;
        request.validate()?;
        Ok(request)
    }

    pub fn threshold_settings(&self) -> ThresholdSettings {
        ThresholdSettings {
            target_ce: self.target_ce,
            upper_threshold_ratio: self.options.upper_threshold_ratio,
            reduction_factor: self.options.reduction_factor,
        }
    }

    /// ke0 given in the request. Callers without an individualized ke0
    /// estimator must not fall back to a fixed value.
    pub fn require_ke0(&self) -> PKResult<f64> {
        self.ke0.ok_or_else(|| {
            PKError::InvalidInput(vec![
                "ke0 is required when no ke0 estimator is configured".to_string()
            ])
        })
    }

    /// Collects every violated rule; nothing is simulated for an invalid request.
    pub fn validate(&self) -> PKResult<()> {
        let mut reasons = Vec::new();
        let patient = &self.patient;

        if patient.id.trim().is_empty() {
            reasons.push("patient id must not be empty".to_string());
        }
        check_range(&mut reasons, "age", patient.age, AGE_RANGE, "years");
        check_range(&mut reasons, "weight", patient.weight, WEIGHT_RANGE, "kg");
        if patient.height > 0.0 {
            check_range(&mut reasons, "BMI", patient.bmi(), BMI_RANGE, "kg/m2");
        } else {
            reasons.push(format!("height {} must be positive", patient.height));
        }
        check_range(&mut reasons, "bolus dose", self.bolus_dose, BOLUS_DOSE_RANGE, "mg");
        check_range(&mut reasons, "target Ce", self.target_ce, TARGET_CE_RANGE, "ug/mL");

        let options = &self.options;
        if !(options.target_reach_time > 0.0 && options.target_reach_time <= SIMULATION_DURATION) {
            reasons.push(format!(
                "target reach time {} must be in (0, {}] min",
                options.target_reach_time, SIMULATION_DURATION
            ));
        }
        if !(options.upper_threshold_ratio > 1.0) {
            reasons.push(format!(
                "upper threshold ratio {} must be greater than 1",
                options.upper_threshold_ratio
            ));
        }
        if !(options.reduction_factor > 0.0 && options.reduction_factor < 1.0) {
            reasons.push(format!(
                "reduction factor {} must be in (0, 1)",
                options.reduction_factor
            ));
        }
        if let Some(ke0) = self.ke0 {
            if !(ke0 > 0.0 && ke0.is_finite()) {
                reasons.push(format!("ke0 {} must be positive", ke0));
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(PKError::InvalidInput(reasons))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::tests::reference_patient;

    pub(crate) fn reference_request() -> ProtocolRequest {
        ProtocolRequest {
            patient: reference_patient(),
            bolus_dose: 7.0,
            target_ce: 1.0,
            ke0: None,
            options: ProtocolOptions::default(),
        }
    }

    #[test]
    fn test_parse_with_defaults() {
        let json = r#"{
            "patient": {"id": "P-17", "age": 62, "weight": 70, "height": 165,
                        "sex": "female", "asa": "high"},
            "bolus_dose": 5,
            "target_ce": 1.2,
            "options": {"reduction_factor": 0.8}
        }"#;
        let request: ProtocolRequest = serde_json::from_str(json).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.ke0, None);
        assert_eq!(request.options.target_reach_time, 20.0);
        assert_eq!(request.options.upper_threshold_ratio, 1.2);
        assert_eq!(request.options.reduction_factor, 0.8);
    }

    #[test]
    fn test_reference_request_is_valid() {
        assert!(reference_request().validate().is_ok());
    }

    #[test]
    fn test_every_violation_is_reported() {
        let mut request = reference_request();
        request.patient.id = " ".to_string();
        request.patient.age = 85.0;
        request.bolus_dose = 20.0;
        request.target_ce = 0.4;

        match request.validate() {
            Err(PKError::InvalidInput(reasons)) => {
                assert_eq!(reasons.len(), 4, "{:?}", reasons);
                assert!(reasons[0].contains("patient id"));
                assert!(reasons[1].contains("age"));
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_bmi_is_checked() {
        let mut request = reference_request();
        request.patient.weight = 118.0;
        request.patient.height = 160.0; // BMI ~46
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("BMI"));
    }

    #[test]
    fn test_domain_edges_are_accepted() {
        let mut request = reference_request();
        request.target_ce = 3.0;
        request.bolus_dose = 1.0;
        assert!(request.validate().is_ok());
        request.target_ce = 0.5;
        request.bolus_dose = 15.0;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_missing_ke0_is_rejected_without_estimator() {
        let mut request = reference_request();
        match request.require_ke0() {
            Err(PKError::InvalidInput(reasons)) => assert!(reasons[0].contains("ke0")),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
        request.ke0 = Some(0.15);
        assert_eq!(request.require_ke0().unwrap(), 0.15);
    }

    #[test]
    fn test_invalid_options() {
        let mut request = reference_request();
        request.options.reduction_factor = 1.0;
        request.options.upper_threshold_ratio = 0.9;
        request.ke0 = Some(0.0);
        match request.validate() {
            Err(PKError::InvalidInput(reasons)) => assert_eq!(reasons.len(), 3),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }
}
