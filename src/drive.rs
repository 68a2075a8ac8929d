//! Closed-loop drive: plant plus the full control stack
//!
//! [`Drive::step`] runs one control interval in a fixed order:
//!
//! 1. phase currents from the plant state
//! 2. FOC update (speed loop, current loops, SVM)
//! 3. flux weakening, whose d-axis reference takes effect next tick
//! 4. disturbance rejection, whose q-axis compensation takes effect next tick
//! 5. plant integration with the FOC voltages
//! 6. parameter identification on the resulting sample
//!
//! Speeds are the plant's `wr`. Flux weakening receives `wr / pole_pairs`,
//! the mechanical speed its base speed is expressed in.

use libm::round;
use serde::Serialize;

use crate::config::MotorParameters;
use crate::disturbance::{DisturbanceMode, DisturbanceRejectionController, PerformanceMetrics};
use crate::error::Error;
use crate::flux_weakening::{FluxWeakeningController, FluxWeakeningMethod};
use crate::foc::{FocController, Modulation, PhaseDuty};
use crate::identification::{
    Excitation, ExcitationSignal, IdentifiedParameters, ParameterIdentifier,
};
use crate::plant::{MotorPlantModel, PlantState};

/// Which optional stages run in [`Drive::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveConfig {
    pub flux_weakening: Option<FluxWeakeningMethod>,
    pub disturbance_rejection: Option<DisturbanceMode>,
    pub identification: bool,
    /// Rescale the FOC loop gains by the adaptive scheduler's adjustments
    pub apply_adaptive_gains: bool,
}

/// Per-tick telemetry bundle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Telemetry {
    /// Simulated time at the end of the step [s]
    pub time: f64,
    pub speed_ref: f64,
    pub speed: f64,
    pub speed_rpm: f64,
    pub angle: f64,
    pub id: f64,
    pub iq: f64,
    pub id_ref: f64,
    pub iq_ref: f64,
    pub vd: f64,
    pub vq: f64,
    pub duty: PhaseDuty,
    pub sector: u8,
    pub torque: f64,
    pub load_torque: f64,
    pub dc_bus_current: f64,
    pub flux_weakening_active: bool,
    /// d-axis reference requested by flux weakening for the next tick [A]
    pub id_flux_weakening: f64,
    pub disturbance_estimate: Option<f64>,
    pub metrics: Option<PerformanceMetrics>,
    pub identified: Option<IdentifiedParameters>,
}

#[derive(Debug, Clone)]
pub struct Drive {
    config: DriveConfig,
    plant: MotorPlantModel,
    foc: FocController,
    flux_weakening: FluxWeakeningController,
    disturbance: DisturbanceRejectionController,
    identifier: ParameterIdentifier,
    excitation: Option<ExcitationSignal>,
    ticks: u64,
    log_interval: u64,
}

impl Drive {
    pub fn new(params: MotorParameters, config: DriveConfig) -> Result<Self, Error> {
        params.validate()?;

        let mut drive = Self {
            config: DriveConfig::default(),
            plant: MotorPlantModel::new(params)?,
            foc: FocController::new(params)?,
            flux_weakening: FluxWeakeningController::new(params)?,
            disturbance: DisturbanceRejectionController::new(params)?,
            identifier: ParameterIdentifier::new(params)?,
            excitation: None,
            ticks: 0,
            log_interval: Self::ticks_per_second(&params),
        };
        drive.configure(config);

        info!(
            "drive: Ts={} s, {} integrator sub-steps",
            params.sample_time,
            drive.plant.substeps()
        );
        Ok(drive)
    }

    fn ticks_per_second(params: &MotorParameters) -> u64 {
        (round(1.0 / params.sample_time) as u64).max(1)
    }

    /// Switch optional stages; a stage turned off stops influencing the FOC
    /// from the next tick
    pub fn configure(&mut self, config: DriveConfig) {
        match config.flux_weakening {
            Some(method) => self.flux_weakening.set_method(method),
            None => {
                self.flux_weakening.reset();
                self.foc.set_id_reference(0.0);
            }
        }
        match config.disturbance_rejection {
            Some(mode) => self.disturbance.set_mode(mode),
            None => self.foc.set_iq_compensation(0.0),
        }
        if config.identification {
            self.identifier.enable();
        } else {
            self.identifier.disable();
        }
        self.config = config;
    }

    pub fn config(&self) -> DriveConfig {
        self.config
    }

    /// Inject a test signal; it runs until exhausted or replaced
    pub fn set_excitation(&mut self, excitation: Option<ExcitationSignal>) {
        self.excitation = excitation;
    }

    /// Advance the closed loop by one sample interval
    ///
    /// # Arguments
    /// * `speed_ref` - Speed reference [rad/s, plant units]
    /// * `load_torque` - External load on the shaft [N·m]
    ///
    /// When the plant reports `NumericalInstability` the controllers are
    /// rolled back with it, so the next finite step starts from the last
    /// good tick.
    pub fn step(&mut self, speed_ref: f64, load_torque: f64) -> Result<Telemetry, Error> {
        let excitation = self.excitation.as_mut().and_then(|signal| signal.next());
        let speed_ref = match excitation {
            Some(Excitation::Speed(delta)) => speed_ref + delta,
            _ => speed_ref,
        };

        // Controllers are restored if the plant rejects this step
        let foc_checkpoint = self.foc.clone();
        let flux_weakening_checkpoint = self.flux_weakening.clone();
        let disturbance_checkpoint = self
            .config
            .disturbance_rejection
            .map(|_| self.disturbance.clone());

        let state = *self.plant.state();
        let pole_pairs = self.plant.params().pole_pairs as f64;
        let (i_a, i_b, i_c) = self.plant.three_phase_currents();

        let foc = self.foc.update(i_a, i_b, i_c, speed_ref, state.wr, state.theta);

        let mut id_next = 0.0;
        if self.config.flux_weakening.is_some() {
            id_next = self
                .flux_weakening
                .update(state.wr / pole_pairs, foc.vd, foc.vq, foc.iq_ref);
        }

        let mut iq_compensation = 0.0;
        if self.config.disturbance_rejection.is_some() {
            let out = self.disturbance.update(
                self.plant.torque(),
                state.wr,
                speed_ref,
                foc.id_actual,
                foc.iq_actual,
                foc.id_ref,
                foc.iq_ref,
            );
            iq_compensation = out.iq_compensation;

            if self.config.apply_adaptive_gains {
                let g = self.disturbance.scheduled_foc_gains();
                self.foc.set_current_gains((g.id_kp, g.id_ki), (g.iq_kp, g.iq_ki));
                self.foc.set_speed_gains(g.speed_kp, g.speed_ki);
            }
        }

        let (mut vd, mut vq) = (foc.vd, foc.vq);
        match excitation {
            Some(Excitation::Current { id, iq }) => {
                id_next += id;
                iq_compensation += iq;
            }
            Some(Excitation::Voltage { vd: dvd, vq: dvq }) => {
                (vd, vq) = self.plant.apply_voltage_limits(vd + dvd, vq + dvq);
            }
            _ => {}
        }
        self.foc.set_id_reference(id_next);
        self.foc.set_iq_compensation(iq_compensation);

        let plant = match self.plant.update(vd, vq, load_torque) {
            Ok(plant) => plant,
            Err(err) => {
                self.foc = foc_checkpoint;
                self.flux_weakening = flux_weakening_checkpoint;
                if let Some(disturbance) = disturbance_checkpoint {
                    self.disturbance = disturbance;
                }
                return Err(err);
            }
        };

        let identified = if self.config.identification {
            Some(self.identifier.update(
                vd,
                plant.id,
                vq,
                plant.iq,
                plant.speed,
                Some(plant.torque),
            ))
        } else {
            None
        };

        self.ticks += 1;
        if self.ticks % self.log_interval == 0 {
            debug!(
                "drive: t={} s, speed {}/{} rad/s, iq {}/{} A",
                self.time(),
                plant.speed,
                speed_ref,
                plant.iq,
                foc.iq_ref
            );
        }

        let dr_enabled = self.config.disturbance_rejection.is_some();
        Ok(Telemetry {
            time: self.time(),
            speed_ref,
            speed: plant.speed,
            speed_rpm: plant.speed_rpm,
            angle: plant.angle,
            id: plant.id,
            iq: plant.iq,
            id_ref: foc.id_ref,
            iq_ref: foc.iq_ref,
            vd,
            vq,
            duty: foc.duty,
            sector: foc.sector,
            torque: plant.torque,
            load_torque,
            dc_bus_current: self.plant.dc_bus_current(),
            flux_weakening_active: self.flux_weakening.in_flux_weakening(),
            id_flux_weakening: self.flux_weakening.id_reference(),
            disturbance_estimate: dr_enabled.then(|| self.disturbance.disturbance_estimate()),
            metrics: dr_enabled.then(|| self.disturbance.metrics()),
            identified,
        })
    }

    /// Simulated time [s]
    pub fn time(&self) -> f64 {
        self.ticks as f64 * self.plant.params().sample_time
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Zero the plant and every controller; configuration is kept
    pub fn reset(&mut self) {
        self.plant.reset();
        self.foc.reset();
        self.flux_weakening.reset();
        self.disturbance.reset();
        self.identifier.reset();
        if let Some(excitation) = self.excitation.as_mut() {
            excitation.rewind();
        }
        self.ticks = 0;
    }

    /// Validate `params` once, then reload every component
    ///
    /// A rejected record leaves the drive untouched.
    pub fn reload(&mut self, params: MotorParameters) -> Result<(), Error> {
        params.validate()?;
        self.plant.reload(params)?;
        self.foc.reload(params)?;
        self.flux_weakening.reload(params)?;
        self.disturbance.reload(params)?;
        self.identifier.reload(params)?;
        self.log_interval = Self::ticks_per_second(&params);
        info!("drive: parameters reloaded");
        Ok(())
    }

    /// Override the plant state, e.g. to start from speed
    pub fn set_plant_state(&mut self, state: PlantState) {
        self.plant.set_state(state);
    }

    pub fn plant(&self) -> &MotorPlantModel {
        &self.plant
    }

    pub fn foc(&self) -> &FocController {
        &self.foc
    }

    /// Select the FOC's inverter modulation
    pub fn set_modulation(&mut self, modulation: Modulation) {
        self.foc.set_modulation(modulation);
    }

    pub fn flux_weakening(&self) -> &FluxWeakeningController {
        &self.flux_weakening
    }

    pub fn flux_weakening_mut(&mut self) -> &mut FluxWeakeningController {
        &mut self.flux_weakening
    }

    pub fn disturbance(&self) -> &DisturbanceRejectionController {
        &self.disturbance
    }

    pub fn disturbance_mut(&mut self) -> &mut DisturbanceRejectionController {
        &mut self.disturbance
    }

    pub fn identifier(&self) -> &ParameterIdentifier {
        &self.identifier
    }

    pub fn identifier_mut(&mut self) -> &mut ParameterIdentifier {
        &mut self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(config: DriveConfig) -> Drive {
        Drive::new(MotorParameters::nominal(), config).unwrap()
    }

    #[test]
    fn test_modulation_only_changes_duties() {
        let mut svm = drive(DriveConfig::default());
        let mut sine = drive(DriveConfig::default());
        sine.set_modulation(Modulation::Sinusoidal);
        assert_eq!(sine.foc().modulation(), Modulation::Sinusoidal);

        for _ in 0..200 {
            let a = svm.step(20.0, 0.0).unwrap();
            let b = sine.step(20.0, 0.0).unwrap();
            assert_eq!(a.speed, b.speed);
            assert_eq!((a.vd, a.vq), (b.vd, b.vq));
        }
    }

    #[test]
    fn test_idle_stays_at_rest() {
        let mut drive = drive(DriveConfig::default());
        for _ in 0..100 {
            let t = drive.step(0.0, 0.0).unwrap();
            assert_eq!(t.speed, 0.0);
            assert_eq!(t.iq, 0.0);
        }
        assert_eq!(drive.ticks(), 100);
        assert!((drive.time() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_optional_stages_report_only_when_enabled() {
        let mut plain = drive(DriveConfig::default());
        let t = plain.step(10.0, 0.0).unwrap();
        assert!(t.disturbance_estimate.is_none());
        assert!(t.identified.is_none());

        let mut full = drive(DriveConfig {
            flux_weakening: Some(FluxWeakeningMethod::VoltageFeedback),
            disturbance_rejection: Some(DisturbanceMode::Observer),
            identification: true,
            apply_adaptive_gains: false,
        });
        let t = full.step(10.0, 0.0).unwrap();
        assert!(t.disturbance_estimate.is_some());
        assert!(t.metrics.is_some());
        assert_eq!(t.identified.map(|p| p.identification_count), Some(1));
    }

    #[test]
    fn test_reload_rejects_invalid_record() {
        let mut drive = drive(DriveConfig::default());
        let bad = MotorParameters {
            sample_time: 0.0,
            ..MotorParameters::nominal()
        };
        assert!(drive.reload(bad).is_err());
        assert_eq!(drive.plant().params(), &MotorParameters::nominal());
    }

    #[test]
    fn test_disabling_flux_weakening_clears_id_reference() {
        let mut drive = drive(DriveConfig {
            flux_weakening: Some(FluxWeakeningMethod::SpeedThreshold),
            ..DriveConfig::default()
        });
        drive.flux_weakening_mut().set_base_speed(1.0).unwrap();
        drive.set_plant_state(PlantState {
            wr: 200.0,
            ..PlantState::default()
        });
        drive.step(200.0, 0.0).unwrap();
        assert!(drive.foc().id_reference() < 0.0);

        drive.configure(DriveConfig::default());
        assert_eq!(drive.foc().id_reference(), 0.0);
    }

    #[test]
    fn test_reset_zeroes_time_and_state() {
        let mut drive = drive(DriveConfig::default());
        for _ in 0..50 {
            drive.step(50.0, 0.0).unwrap();
        }
        drive.reset();
        assert_eq!(drive.ticks(), 0);
        assert_eq!(drive.plant().state(), &PlantState::default());
    }
}
