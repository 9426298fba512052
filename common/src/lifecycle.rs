use tracing::{info, warn};

use crate::{
    error::{ResponderError, SamplerError},
    hardware::ConnectivitySource,
    sampler::TickHook,
    types::{ConnectivityStatus, ServerState},
};

pub trait Endpoint: Send {
    fn start(&mut self) -> Result<(), ResponderError>;
    fn stop(&mut self);
    fn poll(&mut self) -> Result<bool, ResponderError>;
}

pub struct ServerLifecycleManager<C, E> {
    connectivity: C,
    endpoint: E,
    last: ConnectivityStatus,
    state: ServerState,
}

impl<C, E> ServerLifecycleManager<C, E>
where
    C: ConnectivitySource,
    E: Endpoint,
{
    pub fn new(connectivity: C, endpoint: E) -> Self {
        let last = ConnectivityStatus::from_connected(connectivity.is_connected());
        let mut manager = Self {
            connectivity,
            endpoint,
            last,
            state: ServerState::Stopped,
        };

        if last.is_connected() {
            manager.ensure_started();
        }
        manager
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn last_observed(&self) -> ConnectivityStatus {
        self.last
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn check(&mut self) -> Result<(), ResponderError> {
        let observed = ConnectivityStatus::from_connected(self.connectivity.is_connected());

        match (self.last, observed) {
            (ConnectivityStatus::Disconnected, ConnectivityStatus::Connected) => {
                info!("network connected");
                self.ensure_started();
            }
            (ConnectivityStatus::Connected, ConnectivityStatus::Disconnected) => {
                info!("network disconnected");
                self.ensure_stopped();
            }
            _ => {}
        }
        self.last = observed;

        if self.state == ServerState::Running {
            self.endpoint.poll()?;
        }
        Ok(())
    }

    /// Returns `false` when the endpoint could not be started. There is no
    /// automatic retry; the next rising edge tries again.
    pub fn ensure_started(&mut self) -> bool {
        if self.state == ServerState::Running {
            return true;
        }

        match self.endpoint.start() {
            Ok(()) => {
                self.state = ServerState::Running;
                match self.connectivity.ip() {
                    Some(ip) => info!("web server started at http://{ip}"),
                    None => info!("web server started"),
                }
                true
            }
            Err(err) => {
                warn!("error starting web server: {err}");
                self.state = ServerState::Stopped;
                false
            }
        }
    }

    pub fn ensure_stopped(&mut self) {
        if self.state == ServerState::Running {
            self.endpoint.stop();
            self.state = ServerState::Stopped;
            info!("web server stopped");
        }
    }

    pub fn shutdown(&mut self) {
        self.ensure_stopped();
    }
}

impl<C, E> TickHook for ServerLifecycleManager<C, E>
where
    C: ConnectivitySource,
    E: Endpoint,
{
    fn on_tick(&mut self) -> Result<(), SamplerError> {
        self.check()
            .map_err(|err| SamplerError::Hook(format!("web server poll failed: {err}")))
    }

    fn on_stop(&mut self) {
        self.shutdown();
    }
}
