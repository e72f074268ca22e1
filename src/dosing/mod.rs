use serde::{Deserialize, Serialize};

/// Infusion rate bounds in mg/kg/hr.
pub const MIN_INFUSION_RATE: f64 = 0.1;
pub const MAX_INFUSION_RATE: f64 = 6.0;

/// Refractory period between two reductions, in minutes.
pub const MINIMUM_ADJUSTMENT_INTERVAL: f64 = 5.0;

pub const DEFAULT_UPPER_THRESHOLD_RATIO: f64 = 1.2;
pub const DEFAULT_REDUCTION_FACTOR: f64 = 0.70;

/// Convert a weight-normalised rate (mg/kg/hr) into mg/min.
pub fn to_mg_per_min(rate_mg_kg_hr: f64, weight: f64) -> f64 {
    rate_mg_kg_hr * weight / 60.0
}

pub fn clamp_rate(rate: f64) -> f64 {
    rate.clamp(MIN_INFUSION_RATE, MAX_INFUSION_RATE)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSettings {
    pub target_ce: f64,
    pub upper_threshold_ratio: f64,
    pub reduction_factor: f64,
}

impl ThresholdSettings {
    pub fn new(target_ce: f64) -> Self {
        Self {
            target_ce,
            upper_threshold_ratio: DEFAULT_UPPER_THRESHOLD_RATIO,
            reduction_factor: DEFAULT_REDUCTION_FACTOR,
        }
    }

    pub fn upper_threshold(&self) -> f64 {
        self.target_ce * self.upper_threshold_ratio
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosageAdjustmentEvent {
    pub time: f64,
    pub old_rate: f64,
    pub new_rate: f64,
    pub ce_at_event: f64,
    pub reduction_percent: f64,
    pub sequence_number: usize,
}

/// Debounced threshold-reduction rule.
///
/// One running mode with a refractory timer: when Ce reaches the upper
/// threshold and at least the minimum interval has passed since the last
/// reduction, the rate is multiplied by the reduction factor (never below
/// `MIN_INFUSION_RATE`). Time is tracked in whole simulation steps so the
/// interval check is exact.
#[derive(Debug, Clone)]
pub struct ThresholdController {
    settings: ThresholdSettings,
    current_rate: f64,
    interval_steps: i64,
    last_adjustment_step: i64,
    events: Vec<DosageAdjustmentEvent>,
}

impl ThresholdController {
    pub fn new(settings: ThresholdSettings, initial_rate: f64, steps_per_minute: f64) -> Self {
        let interval_steps = (MINIMUM_ADJUSTMENT_INTERVAL * steps_per_minute).round() as i64;
        Self {
            settings,
            current_rate: clamp_rate(initial_rate),
            interval_steps,
            // First crossing is always eligible.
            last_adjustment_step: -interval_steps,
            events: Vec::new(),
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.current_rate
    }

    pub fn adjustment_count(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[DosageAdjustmentEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<DosageAdjustmentEvent> {
        self.events
    }

    /// Apply the rule to the Ce observed at `step`. Returns the event if a
    /// reduction happened.
    pub fn observe(&mut self, step: i64, time: f64, ce: f64) -> Option<&DosageAdjustmentEvent> {
        let above_threshold = ce >= self.settings.upper_threshold();
        let refractory_over = step - self.last_adjustment_step >= self.interval_steps;
        let can_reduce = self.current_rate > MIN_INFUSION_RATE;

        if !(above_threshold && refractory_over && can_reduce) {
            return None;
        }

        let old_rate = self.current_rate;
        let new_rate = (old_rate * self.settings.reduction_factor).max(MIN_INFUSION_RATE);
        self.current_rate = new_rate;
        self.last_adjustment_step = step;
        self.events.push(DosageAdjustmentEvent {
            time,
            old_rate,
            new_rate,
            ce_at_event: ce,
            reduction_percent: (1.0 - new_rate / old_rate) * 100.0,
            sequence_number: self.events.len() + 1,
        });
        self.events.last()
    }
}
