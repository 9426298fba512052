use std::net::IpAddr;

use crate::{error::ActuatorError, types::ActuatorState};

/// A single temperature probe. Implementations absorb their own bus errors
/// and report them as `None`.
pub trait TemperatureSensor: Send {
    fn read(&mut self) -> Option<f32>;
}

pub trait Actuator: Send {
    fn drive(&mut self, state: ActuatorState) -> Result<(), ActuatorError>;
}

pub trait ConnectivitySource: Send {
    fn is_connected(&self) -> bool;
    fn ip(&self) -> Option<IpAddr>;
}
