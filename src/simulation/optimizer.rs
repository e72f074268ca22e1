use super::{open_loop_ce, IndividualModel};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Inclusive candidate grid in mg/kg/hr.
pub const OPTIMIZATION_MIN_RATE: f64 = 0.3;
pub const OPTIMIZATION_MAX_RATE: f64 = 4.0;
pub const OPTIMIZATION_RATE_STEP: f64 = 0.1;

pub const DEFAULT_TARGET_REACH_TIME: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCandidate {
    pub rate: f64,
    pub ce: f64,
    pub error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub optimal_rate: f64,
    pub predicted_ce: f64,
    pub absolute_error: f64,
    /// Percent of the target concentration.
    pub relative_error: f64,
    pub candidates: Vec<RateCandidate>,
}

/// Candidate rates, generated by index so the count never depends on
/// accumulated rounding.
pub fn candidate_rates() -> Vec<f64> {
    let span = OPTIMIZATION_MAX_RATE - OPTIMIZATION_MIN_RATE;
    let steps = (span / OPTIMIZATION_RATE_STEP).round() as usize;
    (0..=steps)
        .map(|i| OPTIMIZATION_MIN_RATE + i as f64 * OPTIMIZATION_RATE_STEP)
        .collect()
}

/// Exhaustive grid search for the continuous rate whose open-loop Ce at
/// `target_reach_time` is closest to `target_ce`.
pub struct RateOptimizer<'a> {
    model: &'a IndividualModel,
}

impl<'a> RateOptimizer<'a> {
    pub fn new(model: &'a IndividualModel) -> Self {
        Self { model }
    }

    pub fn optimize(
        &self,
        bolus_dose: f64,
        target_ce: f64,
        target_reach_time: f64,
    ) -> OptimizationResult {
        let candidates: Vec<RateCandidate> = candidate_rates()
            .into_par_iter()
            .map(|rate| {
                let ce = open_loop_ce(self.model, bolus_dose, rate, target_reach_time);
                RateCandidate {
                    rate,
                    ce,
                    error: (ce - target_ce).abs(),
                }
            })
            .collect();

        // Strict less-than: ties keep the lowest rate.
        let mut best = candidates[0];
        for candidate in &candidates {
            debug!(
                "rate {:.1} mg/kg/hr -> Ce({}) = {:.4} (error {:.4})",
                candidate.rate, target_reach_time, candidate.ce, candidate.error
            );
            if candidate.error < best.error {
                best = *candidate;
            }
        }

        info!(
            "Optimal rate {:.1} mg/kg/hr: Ce({} min) = {:.3} ug/mL for target {:.2}",
            best.rate, target_reach_time, best.ce, target_ce
        );

        OptimizationResult {
            optimal_rate: best.rate,
            predicted_ce: best.ce,
            absolute_error: best.error,
            relative_error: best.error / target_ce * 100.0,
            candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::tests::reference_model;
    use approx::assert_relative_eq;

    #[test]
    fn test_candidate_grid() {
        let rates = candidate_rates();
        assert_eq!(rates.len(), 38);
        assert_eq!(rates[0], OPTIMIZATION_MIN_RATE);
        assert_relative_eq!(*rates.last().unwrap(), OPTIMIZATION_MAX_RATE, epsilon = 1e-12);
        assert!(rates.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_reference_optimum() {
        let model = reference_model();
        let result = RateOptimizer::new(&model).optimize(7.0, 1.0, 20.0);

        assert_relative_eq!(result.optimal_rate, 0.7, epsilon = 1e-12);
        assert_relative_eq!(result.predicted_ce, 1.0499359426931243, epsilon = 1e-9);
        assert_relative_eq!(result.absolute_error, 0.04993594269312429, epsilon = 1e-9);
        assert_relative_eq!(result.relative_error, 4.993594269312429, epsilon = 1e-7);
        assert_eq!(result.candidates.len(), 38);
    }

    #[test]
    fn test_global_optimum_over_grid() {
        let model = reference_model();
        for &(bolus, target) in &[(3.0, 1.0), (10.0, 1.0), (7.0, 2.0), (15.0, 0.8)] {
            let result = RateOptimizer::new(&model).optimize(bolus, target, 20.0);
            assert!(result
                .candidates
                .iter()
                .all(|c| result.absolute_error <= c.error));
            let first_best = result
                .candidates
                .iter()
                .find(|c| c.error == result.absolute_error)
                .unwrap();
            assert_eq!(first_best.rate, result.optimal_rate);
        }
    }

    #[test]
    fn test_candidates_in_grid_order() {
        let model = reference_model();
        let result = RateOptimizer::new(&model).optimize(7.0, 1.0, 20.0);
        let rates: Vec<f64> = result.candidates.iter().map(|c| c.rate).collect();
        assert_eq!(rates, candidate_rates());
        assert!(result.candidates.windows(2).all(|w| w[1].ce > w[0].ce));
    }

    #[test]
    fn test_boundary_targets_stay_on_grid() {
        let model = reference_model();

        let low = RateOptimizer::new(&model).optimize(7.0, 0.5, 20.0);
        assert_eq!(low.optimal_rate, OPTIMIZATION_MIN_RATE);
        assert_relative_eq!(low.predicted_ce, 0.5777555445109612, epsilon = 1e-9);

        let high = RateOptimizer::new(&model).optimize(7.0, 3.0, 20.0);
        assert_relative_eq!(high.optimal_rate, 2.4, epsilon = 1e-12);
        assert!((OPTIMIZATION_MIN_RATE..=OPTIMIZATION_MAX_RATE).contains(&high.optimal_rate));
        assert_relative_eq!(high.predicted_ce, 3.0567026349673196, epsilon = 1e-9);
    }
}
