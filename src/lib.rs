//! Field-oriented control stack for permanent-magnet synchronous machines.
//!
//! Every component is a plain step-driven state machine: one `update()` call
//! advances it by exactly one sample interval. Nothing here owns a thread,
//! a timer or a heap allocation, so the same code runs inside a firmware
//! control ISR or a host-side simulation harness.
//!
//! Per-tick control flow (see [`drive::Drive`]):
//!
//! ```text
//! plant ─► phase currents ─► FocController ─► FluxWeakeningController (id_ref)
//!                                          └► DisturbanceRejectionController (iq_ref)
//!        ◄──────────────── plant.update(vd, vq, load) ◄┘
//!                     ParameterIdentifier observes on the side
//! ```

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod config;
pub mod disturbance;
pub mod drive;
pub mod error;
pub mod flux_weakening;
pub mod foc;
pub mod identification;
pub mod plant;

pub use config::MotorParameters;
pub use disturbance::{DisturbanceMode, DisturbanceRejectionController};
pub use drive::{Drive, DriveConfig, Telemetry};
pub use error::{ConfigError, Error, ModeSelector};
pub use flux_weakening::{FluxWeakeningController, FluxWeakeningMethod};
pub use foc::{FocController, PiController};
pub use identification::{IdentifiedParameters, ParameterIdentifier};
pub use plant::{MotorPlantModel, PlantState};
