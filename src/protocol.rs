//! End-to-end protocol generation: PK parameters, optimal continuous rate,
//! closed-loop simulation, performance metrics, the clinician-facing step
//! list and a fixed-dose comparison sweep.

use crate::config::ProtocolRequest;
use crate::dosing::{DosageAdjustmentEvent, ThresholdSettings};
use crate::error::PKResult;
use crate::models::{FixedKe0, Ke0Model, PKParameters};
use crate::simulation::{
    IndividualModel, OptimizationResult, PerformanceMetrics, RateOptimizer, SimulationSample,
    ThresholdProtocolSimulator,
};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bolus doses (mg) compared against the requested one.
pub const COMPARISON_DOSES: [f64; 4] = [3.0, 5.0, 7.0, 10.0];

const SINGLE_ADJUSTMENT_BONUS: f64 = 10.0;
const FINAL_CE_BONUS: f64 = 15.0;
const FINAL_CE_REFERENCE: f64 = 1.0;
const FINAL_CE_BAND: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationTier {
    Top,
    Good,
    Acceptable,
    NeedsReview,
}

impl RecommendationTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            RecommendationTier::Top
        } else if score >= 75.0 {
            RecommendationTier::Good
        } else if score >= 60.0 {
            RecommendationTier::Acceptable
        } else {
            RecommendationTier::NeedsReview
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecommendationTier::Top => "top",
            RecommendationTier::Good => "good",
            RecommendationTier::Acceptable => "acceptable",
            RecommendationTier::NeedsReview => "needs-review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Bolus,
    StartInfusion,
    Reduction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub elapsed_minutes: f64,
    pub kind: StepKind,
    pub label: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseComparison {
    pub bolus_dose: f64,
    pub optimal_rate: f64,
    pub predicted_ce: f64,
    pub adjustment_count: usize,
    pub metrics: PerformanceMetrics,
    pub score: f64,
    pub tier: RecommendationTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolResult {
    pub patient_id: String,
    pub bolus_dose: f64,
    pub target_ce: f64,
    pub parameters: PKParameters,
    pub optimal_rate: f64,
    pub optimization: OptimizationResult,
    pub trajectory: Vec<SimulationSample>,
    pub adjustments: Vec<DosageAdjustmentEvent>,
    pub metrics: PerformanceMetrics,
    pub steps: Vec<ProtocolStep>,
    pub comparison: Vec<DoseComparison>,
}

/// Output of one bolus dose through optimizer and closed-loop simulator.
struct PipelineRun {
    optimization: OptimizationResult,
    trajectory: Vec<SimulationSample>,
    adjustments: Vec<DosageAdjustmentEvent>,
    metrics: PerformanceMetrics,
}

fn run_pipeline(
    model: &IndividualModel,
    settings: ThresholdSettings,
    bolus_dose: f64,
    target_reach_time: f64,
) -> PKResult<PipelineRun> {
    let optimization =
        RateOptimizer::new(model).optimize(bolus_dose, settings.target_ce, target_reach_time);
    let result = ThresholdProtocolSimulator::new(*model, settings)
        .simulate(bolus_dose, optimization.optimal_rate);
    result.ensure_finite()?;

    Ok(PipelineRun {
        optimization,
        trajectory: result.trajectory,
        adjustments: result.adjustments,
        metrics: result.metrics,
    })
}

/// Heuristic ranking score of one candidate dose.
pub fn comparison_score(metrics: &PerformanceMetrics, adjustment_count: usize) -> f64 {
    let mut score = metrics.target_accuracy_percent;
    if adjustment_count == 1 {
        score += SINGLE_ADJUSTMENT_BONUS;
    }
    if (metrics.final_ce - FINAL_CE_REFERENCE).abs() < FINAL_CE_BAND {
        score += FINAL_CE_BONUS;
    }
    score
}

fn format_elapsed(minutes: f64) -> String {
    if minutes == 0.0 {
        "0 min".to_string()
    } else {
        format!("+{:.1} min", minutes)
    }
}

pub fn protocol_steps(
    bolus_dose: f64,
    initial_rate: f64,
    adjustments: &[DosageAdjustmentEvent],
) -> Vec<ProtocolStep> {
    let mut steps = vec![
        ProtocolStep {
            elapsed_minutes: 0.0,
            kind: StepKind::Bolus,
            label: format_elapsed(0.0),
            description: format!("Administer {:.1} mg IV bolus", bolus_dose),
        },
        ProtocolStep {
            elapsed_minutes: 0.0,
            kind: StepKind::StartInfusion,
            label: format_elapsed(0.0),
            description: format!("Start continuous infusion at {:.2} mg/kg/hr", initial_rate),
        },
    ];

    steps.extend(adjustments.iter().map(|event| ProtocolStep {
        elapsed_minutes: event.time,
        kind: StepKind::Reduction,
        label: format_elapsed(event.time),
        description: format!(
            "Reduce infusion {:.2} -> {:.2} mg/kg/hr (-{:.0}%, Ce {:.2} ug/mL)",
            event.old_rate, event.new_rate, event.reduction_percent, event.ce_at_event
        ),
    }));

    steps
}

pub struct ProtocolGenerator<K: Ke0Model = FixedKe0> {
    ke0_model: K,
    run_comparison: bool,
}

impl<K: Ke0Model> ProtocolGenerator<K> {
    pub fn new(ke0_model: K) -> Self {
        Self {
            ke0_model,
            run_comparison: true,
        }
    }

    pub fn with_comparison(mut self, enabled: bool) -> Self {
        self.run_comparison = enabled;
        self
    }

    pub fn individual_model(&self, request: &ProtocolRequest) -> IndividualModel {
        let mut model = IndividualModel::from_patient(&request.patient, &self.ke0_model);
        if let Some(ke0) = request.ke0 {
            model.parameters.ke0 = ke0;
        }
        model
    }

    pub fn generate(&self, request: &ProtocolRequest) -> PKResult<ProtocolResult> {
        request.validate()?;

        let model = self.individual_model(request);
        let p = &model.parameters;
        info!(
            "Patient {}: V1={:.3} V2={:.3} V3={:.3} L, CL={:.3} Q2={:.3} Q3={:.3} L/min, \
             ke0={:.4}/min",
            request.patient.id, p.v1, p.v2, p.v3, p.cl, p.q2, p.q3, p.ke0
        );

        let settings = request.threshold_settings();
        let reach_time = request.options.target_reach_time;
        let run = run_pipeline(&model, settings, request.bolus_dose, reach_time)?;
        let steps = protocol_steps(
            request.bolus_dose,
            run.optimization.optimal_rate,
            &run.adjustments,
        );

        let comparison = if self.run_comparison {
            self.compare_doses(&model, settings, reach_time)
        } else {
            Vec::new()
        };

        Ok(ProtocolResult {
            patient_id: request.patient.id.clone(),
            bolus_dose: request.bolus_dose,
            target_ce: request.target_ce,
            parameters: model.parameters,
            optimal_rate: run.optimization.optimal_rate,
            optimization: run.optimization,
            trajectory: run.trajectory,
            adjustments: run.adjustments,
            metrics: run.metrics,
            steps,
            comparison,
        })
    }

    /// Runs the fixed comparison doses.
    pub fn compare_doses(
        &self,
        model: &IndividualModel,
        settings: ThresholdSettings,
        target_reach_time: f64,
    ) -> Vec<DoseComparison> {
        self.compare_dose_set(&COMPARISON_DOSES, model, settings, target_reach_time)
    }

    /// Runs every dose in `doses`; a failing dose is logged and left out,
    /// the rest are ranked by score.
    pub fn compare_dose_set(
        &self,
        doses: &[f64],
        model: &IndividualModel,
        settings: ThresholdSettings,
        target_reach_time: f64,
    ) -> Vec<DoseComparison> {
        let runs: Vec<(f64, PKResult<PipelineRun>)> = doses
            .par_iter()
            .map(|&dose| (dose, run_pipeline(model, settings, dose, target_reach_time)))
            .collect();

        let mut table: Vec<DoseComparison> = runs
            .into_iter()
            .filter_map(|(dose, run)| match run {
                Ok(run) => {
                    let adjustment_count = run.adjustments.len();
                    let score = comparison_score(&run.metrics, adjustment_count);
                    Some(DoseComparison {
                        bolus_dose: dose,
                        optimal_rate: run.optimization.optimal_rate,
                        predicted_ce: run.optimization.predicted_ce,
                        adjustment_count,
                        metrics: run.metrics,
                        score,
                        tier: RecommendationTier::from_score(score),
                    })
                }
                Err(e) => {
                    warn!("Comparison dose {} mg dropped: {}", dose, e);
                    None
                }
            })
            .collect();

        table.sort_by(|a, b| b.score.total_cmp(&a.score));
        table
    }
}

impl Default for ProtocolGenerator<FixedKe0> {
    fn default() -> Self {
        Self::new(FixedKe0::default())
    }
}
