use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::debug;

use freezer_common::{
    types::round_tenth, Actuator, ActuatorError, ActuatorState, ConnectivitySource,
    TemperatureSensor,
};

pub const CONVERSION_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
pub struct SimulationProfile {
    pub start_c: f32,
    pub ambient_c: f32,
    pub evaporator_c: f32,
    /// Fraction of the gap to the goal temperature closed per read.
    pub response: f32,
    /// Every Nth read yields nothing, like a flaky one-wire bus.
    pub drop_every: Option<u32>,
    pub conversion_delay: Duration,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            start_c: 4.0,
            ambient_c: 22.0,
            evaporator_c: -25.0,
            response: 0.02,
            drop_every: None,
            conversion_delay: CONVERSION_DELAY,
        }
    }
}

pub struct SimulatedSensor {
    profile: SimulationProfile,
    temp_c: f32,
    cooling: Arc<AtomicBool>,
    reads: u32,
}

impl SimulatedSensor {
    pub fn new(profile: SimulationProfile, cooling: Arc<AtomicBool>) -> Self {
        Self {
            temp_c: profile.start_c,
            profile,
            cooling,
            reads: 0,
        }
    }
}

impl TemperatureSensor for SimulatedSensor {
    fn read(&mut self) -> Option<f32> {
        self.reads = self.reads.wrapping_add(1);
        if let Some(every) = self.profile.drop_every.filter(|every| *every > 0) {
            if self.reads % every == 0 {
                return None;
            }
        }

        if !self.profile.conversion_delay.is_zero() {
            thread::sleep(self.profile.conversion_delay);
        }

        let goal = if self.cooling.load(Ordering::Relaxed) {
            self.profile.evaporator_c
        } else {
            self.profile.ambient_c
        };
        self.temp_c += (goal - self.temp_c) * self.profile.response;
        Some(round_tenth(self.temp_c))
    }
}

pub struct LoggingActuator {
    cooling: Arc<AtomicBool>,
}

impl LoggingActuator {
    pub fn new(cooling: Arc<AtomicBool>) -> Self {
        Self { cooling }
    }
}

impl Actuator for LoggingActuator {
    fn drive(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        let was_cooling = self.cooling.swap(state.is_cooling(), Ordering::Relaxed);
        if was_cooling != state.is_cooling() {
            debug!("cooling relay {}", if state.is_cooling() { "on" } else { "off" });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ToggleConnectivity {
    connected: Arc<AtomicBool>,
    address: IpAddr,
}

impl ToggleConnectivity {
    pub fn new(connected: bool, address: IpAddr) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
            address,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

impl ConnectivitySource for ToggleConnectivity {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn ip(&self) -> Option<IpAddr> {
        self.is_connected().then_some(self.address)
    }
}
