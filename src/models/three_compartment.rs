//! Mammillary three-compartment model with an effect-site compartment.
//!
//! Compartment masses are integrated with classical fourth-order Runge-Kutta;
//! the effect-site concentration follows with an explicit first-order update
//! driven by the plasma concentration at the start of the step.

use super::{PKParameters, RateConstants};
use serde::{Deserialize, Serialize};

/// Drug mass (mg) in the central and the two peripheral compartments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompartmentState {
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
}

impl CompartmentState {
    /// Instantaneous bolus, fully distributed into the central compartment.
    pub fn from_bolus(dose: f64) -> Self {
        Self {
            a1: dose,
            a2: 0.0,
            a3: 0.0,
        }
    }

    /// Plasma concentration in µg/mL (mg/L).
    pub fn plasma_concentration(&self, v1: f64) -> f64 {
        self.a1 / v1
    }

    fn offset(&self, slope: &CompartmentState, h: f64) -> Self {
        Self {
            a1: self.a1 + h * slope.a1,
            a2: self.a2 + h * slope.a2,
            a3: self.a3 + h * slope.a3,
        }
    }
}

/// Mass derivatives for a constant infusion (mg/min).
pub fn derivatives(state: &CompartmentState, k: &RateConstants, infusion: f64) -> CompartmentState {
    CompartmentState {
        a1: infusion - (k.k10 + k.k12 + k.k13) * state.a1 + k.k21 * state.a2 + k.k31 * state.a3,
        a2: k.k12 * state.a1 - k.k21 * state.a2,
        a3: k.k13 * state.a1 - k.k31 * state.a3,
    }
}

/// One RK4 step of length `dt`. The infusion is held constant over all four stages.
pub fn rk4_step(
    state: &CompartmentState,
    k: &RateConstants,
    infusion: f64,
    dt: f64,
) -> CompartmentState {
    let k1 = derivatives(state, k, infusion);
    let k2 = derivatives(&state.offset(&k1, dt / 2.0), k, infusion);
    let k3 = derivatives(&state.offset(&k2, dt / 2.0), k, infusion);
    let k4 = derivatives(&state.offset(&k3, dt), k, infusion);

    CompartmentState {
        a1: state.a1 + dt / 6.0 * (k1.a1 + 2.0 * k2.a1 + 2.0 * k3.a1 + k4.a1),
        a2: state.a2 + dt / 6.0 * (k1.a2 + 2.0 * k2.a2 + 2.0 * k3.a2 + k4.a2),
        a3: state.a3 + dt / 6.0 * (k1.a3 + 2.0 * k2.a3 + 2.0 * k3.a3 + k4.a3),
    }
}

/// Explicit Euler update of the effect-site concentration.
pub fn update_effect_site(ce: f64, plasma: f64, ke0: f64, dt: f64) -> f64 {
    ce + dt * ke0 * (plasma - ce)
}

/// Compartment masses plus effect-site concentration at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub compartments: CompartmentState,
    pub ce: f64,
}

impl ModelState {
    /// t = 0 state right after the bolus: Ce has not started to rise yet.
    pub fn after_bolus(dose: f64) -> Self {
        Self {
            compartments: CompartmentState::from_bolus(dose),
            ce: 0.0,
        }
    }

    pub fn plasma(&self, params: &PKParameters) -> f64 {
        self.compartments.plasma_concentration(params.v1)
    }

    /// Advance one step. Plasma is sampled before the compartments move.
    pub fn advance(
        &self,
        params: &PKParameters,
        k: &RateConstants,
        infusion: f64,
        dt: f64,
    ) -> Self {
        let plasma = self.plasma(params);
        Self {
            ce: update_effect_site(self.ce, plasma, params.ke0, dt),
            compartments: rk4_step(&self.compartments, k, infusion, dt),
        }
    }
}
