use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorState {
    Cooling,
    Idle,
}

impl ActuatorState {
    // Equality stays idle.
    pub fn decide(current_c: f32, target_c: f32) -> Self {
        if current_c > target_c {
            Self::Cooling
        } else {
            Self::Idle
        }
    }

    pub fn is_cooling(self) -> bool {
        matches!(self, Self::Cooling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cooling => "cooling",
            Self::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    Cooling,
    Heating,
}

impl ThermalState {
    pub fn from_readings(current_c: f32, target_c: f32) -> Self {
        match ActuatorState::decide(current_c, target_c) {
            ActuatorState::Cooling => Self::Cooling,
            ActuatorState::Idle => Self::Heating,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cooling => "cooling",
            Self::Heating => "heating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Connected,
    Disconnected,
}

impl ConnectivityStatus {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    pub current_c: f32,
    pub target_c: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryPayload {
    pub temperature: f32,
    pub target_temperature: f32,
    pub state: ThermalState,
}

impl TelemetryPayload {
    pub fn from_readings(readings: Readings) -> Self {
        Self {
            temperature: round_tenth(readings.current_c),
            target_temperature: round_tenth(readings.target_c),
            state: ThermalState::from_readings(readings.current_c, readings.target_c),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetUpdateResponse {
    pub success: bool,
    pub target: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

pub fn round_tenth(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
