//! Bolus plus continuous-infusion planning for a sedative on a
//! three-compartment PK model with an effect-site compartment.
//!
//! The continuous rate is chosen by grid search so the simulated effect-site
//! concentration reaches the target at a given time; a debounced threshold
//! rule then reduces the rate whenever Ce overshoots.

pub mod config;
pub mod dosing;
pub mod error;
pub mod models;
pub mod output;
pub mod protocol;
pub mod simulation;

pub use config::{ProtocolOptions, ProtocolRequest};
pub use error::{PKError, PKResult};
pub use models::{AsaClass, FixedKe0, Ke0Model, PKParameters, PatientCovariates, Sex};
pub use protocol::{ProtocolGenerator, ProtocolResult};
