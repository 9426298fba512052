pub mod assets;
pub mod config;
pub mod error;
pub mod hardware;
pub mod http;
pub mod lifecycle;
pub mod responder;
pub mod sampler;
pub mod state;
pub mod types;

pub use assets::WebAssets;
pub use config::{ControlConfig, ControllerConfig, ResponderConfig, SamplerConfig};
pub use error::{ActuatorError, RequestError, ResponderError, SamplerError};
pub use hardware::{Actuator, ConnectivitySource, TemperatureSensor};
pub use lifecycle::{Endpoint, ServerLifecycleManager};
pub use responder::Responder;
pub use sampler::{NoopHook, Sampler, SamplerPhase, SamplerTask, TickHook, TickReport};
pub use state::{ControlState, TemperatureProvider};
pub use types::{
    ActuatorState, ConnectivityStatus, Readings, ServerState, TelemetryPayload, ThermalState,
};
