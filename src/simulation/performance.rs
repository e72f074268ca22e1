use super::SimulationSample;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Steady-state metrics only consider samples from this time on (min).
pub const MAINTENANCE_WINDOW_START: f64 = 60.0;

/// Half-width of the accuracy band, as a fraction of the target.
pub const ACCURACY_TOLERANCE: f64 = 0.10;

/// Distance to target counted as converged, as a fraction of the target.
pub const CONVERGENCE_TOLERANCE: f64 = 0.05;

const STABILITY_SCALE: f64 = 1000.0;

/// Summary statistics of a completed trajectory.
///
/// `avg_deviation` and `convergence_time` are `f64::INFINITY` when undefined
/// (empty maintenance window, target never reached). Serialized as `null`
/// and read back as `f64::INFINITY`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub final_ce: f64,
    pub max_ce: f64,
    #[serde(with = "unbounded")]
    pub avg_deviation: f64,
    pub target_accuracy_percent: f64,
    pub stability_index: f64,
    #[serde(with = "unbounded")]
    pub convergence_time: f64,
}

/// `f64` that is `INFINITY` when undefined, stored as `null` in JSON.
mod unbounded {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

impl PerformanceMetrics {
    pub fn has_converged(&self) -> bool {
        self.convergence_time.is_finite()
    }
}

pub fn evaluate_performance(trajectory: &[SimulationSample], target_ce: f64) -> PerformanceMetrics {
    let final_ce = trajectory.last().map_or(0.0, |s| s.ce);
    let max_ce = trajectory.iter().map(|s| s.ce).fold(0.0, f64::max);
    let convergence_time = trajectory
        .iter()
        .find(|s| (s.ce - target_ce).abs() <= CONVERGENCE_TOLERANCE * target_ce)
        .map_or(f64::INFINITY, |s| s.time);

    let maintenance: Vec<f64> = trajectory
        .iter()
        .filter(|s| s.time >= MAINTENANCE_WINDOW_START)
        .map(|s| s.ce)
        .collect();

    if maintenance.is_empty() {
        return PerformanceMetrics {
            final_ce,
            max_ce,
            avg_deviation: f64::INFINITY,
            target_accuracy_percent: 0.0,
            stability_index: 0.0,
            convergence_time,
        };
    }

    let n = maintenance.len() as f64;
    let avg_deviation = maintenance.iter().map(|ce| (ce - target_ce).abs()).sum::<f64>() / n;
    let within = maintenance
        .iter()
        .filter(|&&ce| (ce - target_ce).abs() <= ACCURACY_TOLERANCE * target_ce)
        .count();

    let mean_step_change = if maintenance.len() < 2 {
        0.0
    } else {
        maintenance.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>()
            / (maintenance.len() - 1) as f64
    };

    PerformanceMetrics {
        final_ce,
        max_ce,
        avg_deviation,
        target_accuracy_percent: within as f64 / n * 100.0,
        stability_index: (100.0 - STABILITY_SCALE * mean_step_change).max(0.0),
        convergence_time,
    }
}
