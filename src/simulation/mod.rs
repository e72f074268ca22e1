pub mod individual;
pub mod optimizer;
pub mod performance;

use crate::dosing::{DosageAdjustmentEvent, ThresholdController, ThresholdSettings};
use crate::error::{PKError, PKResult};
use crate::models::ModelState;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub use individual::*;
pub use optimizer::*;
pub use performance::*;

/// Integration step in minutes.
pub const TIME_STEP: f64 = 0.1;
pub const STEPS_PER_MINUTE: f64 = 10.0;

/// Horizon of one closed-loop protocol run, in minutes.
pub const SIMULATION_DURATION: f64 = 180.0;

/// Sample time of step `i`, computed from the index so it never drifts.
pub fn time_at(step: usize) -> f64 {
    step as f64 / STEPS_PER_MINUTE
}

pub fn steps_for(duration: f64) -> usize {
    (duration * STEPS_PER_MINUTE).round() as usize
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSample {
    pub time: f64,
    pub ce: f64,
    pub plasma: f64,
    pub infusion_rate: f64,
    pub cumulative_adjustment_count: usize,
    pub is_bolus_event: bool,
}

impl SimulationSample {
    fn bolus(state: &ModelState, model: &IndividualModel, rate: f64) -> Self {
        Self {
            time: 0.0,
            ce: state.ce,
            plasma: state.plasma(&model.parameters),
            infusion_rate: rate,
            cumulative_adjustment_count: 0,
            is_bolus_event: true,
        }
    }
}

/// Effect-site concentration after `duration` minutes of bolus plus constant
/// infusion, without threshold control.
pub fn open_loop_ce(model: &IndividualModel, bolus_dose: f64, rate: f64, duration: f64) -> f64 {
    let k = model.rate_constants();
    let infusion = model.infusion_mg_per_min(rate);
    (0..steps_for(duration))
        .fold(ModelState::after_bolus(bolus_dose), |state, _| {
            state.advance(&model.parameters, &k, infusion, TIME_STEP)
        })
        .ce
}

/// Full open-loop trajectory, one sample per step including t = 0.
pub fn open_loop_trajectory(
    model: &IndividualModel,
    bolus_dose: f64,
    rate: f64,
    duration: f64,
) -> Vec<SimulationSample> {
    let k = model.rate_constants();
    let infusion = model.infusion_mg_per_min(rate);
    let steps = steps_for(duration);

    let mut state = ModelState::after_bolus(bolus_dose);
    let mut trajectory = Vec::with_capacity(steps + 1);
    trajectory.push(SimulationSample::bolus(&state, model, rate));

    for step in 1..=steps {
        state = state.advance(&model.parameters, &k, infusion, TIME_STEP);
        trajectory.push(SimulationSample {
            time: time_at(step),
            ce: state.ce,
            plasma: state.plasma(&model.parameters),
            infusion_rate: rate,
            cumulative_adjustment_count: 0,
            is_bolus_event: false,
        });
    }

    trajectory
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub trajectory: Vec<SimulationSample>,
    pub adjustments: Vec<DosageAdjustmentEvent>,
    pub metrics: PerformanceMetrics,
}

impl SimulationResult {
    /// Reject trajectories that left the finite range. Nothing is clamped.
    pub fn ensure_finite(&self) -> PKResult<()> {
        match self
            .trajectory
            .iter()
            .find(|s| !s.ce.is_finite() || !s.plasma.is_finite())
        {
            Some(sample) => Err(PKError::Simulation(format!(
                "non-finite concentration at t = {:.1} min",
                sample.time
            ))),
            None => Ok(()),
        }
    }
}

/// Fixed-horizon run of bolus + continuous infusion under the debounced
/// threshold-reduction rule.
pub struct ThresholdProtocolSimulator {
    model: IndividualModel,
    settings: ThresholdSettings,
}

impl ThresholdProtocolSimulator {
    pub fn new(model: IndividualModel, settings: ThresholdSettings) -> Self {
        Self { model, settings }
    }

    pub fn simulate(&self, bolus_dose: f64, initial_rate: f64) -> SimulationResult {
        let params = &self.model.parameters;
        let k = self.model.rate_constants();
        let steps = steps_for(SIMULATION_DURATION);

        let mut controller =
            ThresholdController::new(self.settings, initial_rate, STEPS_PER_MINUTE);
        let mut state = ModelState::after_bolus(bolus_dose);
        let mut trajectory = Vec::with_capacity(steps + 1);
        trajectory.push(SimulationSample::bolus(&state, &self.model, controller.current_rate()));

        for step in 1..=steps {
            let infusion = self.model.infusion_mg_per_min(controller.current_rate());
            state = state.advance(params, &k, infusion, TIME_STEP);
            let time = time_at(step);

            if let Some(event) = controller.observe(step as i64, time, state.ce) {
                debug!(
                    "t={:.1} min: Ce {:.3} >= {:.3}, rate {:.3} -> {:.3} mg/kg/hr",
                    event.time,
                    event.ce_at_event,
                    self.settings.upper_threshold(),
                    event.old_rate,
                    event.new_rate
                );
            }

            trajectory.push(SimulationSample {
                time,
                ce: state.ce,
                plasma: state.plasma(params),
                infusion_rate: controller.current_rate(),
                cumulative_adjustment_count: controller.adjustment_count(),
                is_bolus_event: false,
            });
        }

        let adjustments = controller.into_events();
        info!(
            "Simulated {} min: {} adjustment(s), final Ce {:.3} ug/mL",
            SIMULATION_DURATION,
            adjustments.len(),
            state.ce
        );
        let metrics = evaluate_performance(&trajectory, self.settings.target_ce);

        SimulationResult {
            trajectory,
            adjustments,
            metrics,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dosing::MIN_INFUSION_RATE;
    use crate::models::tests::reference_patient;
    use crate::models::FixedKe0;
    use approx::assert_relative_eq;

    pub(crate) fn reference_model() -> IndividualModel {
        IndividualModel::from_patient(&reference_patient(), &FixedKe0::default())
    }

    fn run(bolus: f64, rate: f64) -> SimulationResult {
        ThresholdProtocolSimulator::new(reference_model(), ThresholdSettings::new(1.0))
            .simulate(bolus, rate)
    }

    #[test]
    fn test_sample_count_and_grid() {
        let result = run(7.0, 0.7);
        assert_eq!(result.trajectory.len(), 1801);
        assert_eq!(result.trajectory[600].time, 60.0);
        assert_eq!(result.trajectory.last().unwrap().time, 180.0);
        assert!(result.trajectory[0].is_bolus_event);
        assert!(result.trajectory[1..].iter().all(|s| !s.is_bolus_event));
    }

    #[test]
    fn test_open_loop_zero_input() {
        let trajectory = open_loop_trajectory(&reference_model(), 0.0, 0.0, SIMULATION_DURATION);
        assert_eq!(trajectory.len(), 1801);
        assert!(trajectory.iter().all(|s| s.ce == 0.0 && s.plasma == 0.0));
    }

    #[test]
    fn test_open_loop_ce_matches_trajectory() {
        let model = reference_model();
        let trajectory = open_loop_trajectory(&model, 7.0, 0.7, 20.0);
        assert_eq!(trajectory.len(), 201);
        assert_eq!(trajectory[200].ce, open_loop_ce(&model, 7.0, 0.7, 20.0));
        assert_relative_eq!(trajectory[200].ce, 1.0499359426931243, epsilon = 1e-9);
    }

    #[test]
    fn test_reference_closed_loop_run() {
        let result = run(7.0, 0.7);
        assert_eq!(result.adjustments.len(), 1);

        let event = &result.adjustments[0];
        assert_relative_eq!(event.time, 41.0, epsilon = 1e-9);
        assert_relative_eq!(event.old_rate, 0.7, epsilon = 1e-12);
        assert_relative_eq!(event.new_rate, 0.49, epsilon = 1e-12);
        assert_relative_eq!(event.ce_at_event, 1.200271070986989, epsilon = 1e-7);
        assert_relative_eq!(event.reduction_percent, 30.0, epsilon = 1e-9);

        let at_event = &result.trajectory[410];
        assert_eq!(at_event.cumulative_adjustment_count, 1);
        assert_relative_eq!(at_event.infusion_rate, 0.49, epsilon = 1e-12);
        assert_eq!(result.trajectory[409].cumulative_adjustment_count, 0);
    }

    #[test]
    fn test_debounce_and_monotonic_reduction() {
        for &(bolus, rate) in &[(3.0, 0.8), (10.0, 2.5), (15.0, 4.0), (1.0, 6.0)] {
            let result = run(bolus, rate);
            for pair in result.adjustments.windows(2) {
                assert!(pair[1].time - pair[0].time >= 5.0 - 1e-9);
                assert!(pair[1].old_rate <= pair[0].new_rate);
                assert_eq!(pair[1].sequence_number, pair[0].sequence_number + 1);
            }
            for event in &result.adjustments {
                assert_eq!(event.new_rate, (event.old_rate * 0.7).max(MIN_INFUSION_RATE));
                assert!(event.ce_at_event >= 1.2);
            }
            for pair in result.trajectory.windows(2) {
                assert!(pair[1].infusion_rate <= pair[0].infusion_rate);
            }
        }
    }

    #[test]
    fn test_determinism() {
        assert_eq!(run(7.0, 0.7), run(7.0, 0.7));
    }

    #[test]
    fn test_ensure_finite_flags_nan() {
        let mut result = run(7.0, 0.7);
        assert!(result.ensure_finite().is_ok());
        result.trajectory[5].ce = f64::NAN;
        assert!(matches!(result.ensure_finite(), Err(PKError::Simulation(_))));
    }
}
