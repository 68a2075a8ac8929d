// FOC (Field Oriented Control) module
// Coordinate transforms, PI primitive, SVPWM and the cascaded controller

pub mod controller;
pub mod pi_controller;
pub mod svpwm;
pub mod transforms;

// Re-export main types for easier access
pub use controller::{FocController, FocGains, FocOutput};
pub use pi_controller::PiController;
pub use svpwm::{calculate_svpwm, sector_from_angle, Modulation, PhaseDuty, SvmOutput};
pub use transforms::{clarke, inverse_clarke, inverse_park, limit_voltage, park};
