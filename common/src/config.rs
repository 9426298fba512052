use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub period_ms: u64,
    pub error_backoff_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period_ms: 1_000,
            error_backoff_ms: 5_000,
            shutdown_grace_ms: 500,
        }
    }
}

impl SamplerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn sanitize(&mut self) {
        self.period_ms = self.period_ms.clamp(100, 60_000);
        self.error_backoff_ms = self.error_backoff_ms.clamp(self.period_ms, 300_000);
        self.shutdown_grace_ms = self.shutdown_grace_ms.min(10_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub accept_timeout_ms: u64,
    pub client_timeout_ms: u64,
    pub max_request_bytes: usize,
    #[serde(default)]
    pub web_root: Option<PathBuf>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            accept_timeout_ms: 500,
            client_timeout_ms: 3_000,
            max_request_bytes: 1_024,
            web_root: None,
        }
    }
}

impl ResponderConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn sanitize(&mut self) {
        self.accept_timeout_ms = self.accept_timeout_ms.clamp(10, 5_000);
        self.client_timeout_ms = self.client_timeout_ms.clamp(100, 30_000);
        self.max_request_bytes = self.max_request_bytes.clamp(256, 16 * 1_024);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub initial_target_c: f32,
    pub fallback_temp_c: f32,
    pub min_target_c: f32,
    pub max_target_c: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            initial_target_c: 20.0,
            fallback_temp_c: 0.0,
            min_target_c: -40.0,
            max_target_c: 40.0,
        }
    }
}

impl ControlConfig {
    pub fn accepts_target(&self, target_c: f32) -> bool {
        target_c.is_finite() && (self.min_target_c..=self.max_target_c).contains(&target_c)
    }

    pub fn sanitize(&mut self) {
        if !self.min_target_c.is_finite() || !self.max_target_c.is_finite() {
            let defaults = Self::default();
            self.min_target_c = defaults.min_target_c;
            self.max_target_c = defaults.max_target_c;
        }
        if self.min_target_c > self.max_target_c {
            std::mem::swap(&mut self.min_target_c, &mut self.max_target_c);
        }
        if !self.initial_target_c.is_finite() {
            self.initial_target_c = Self::default().initial_target_c;
        }
        self.initial_target_c = self
            .initial_target_c
            .clamp(self.min_target_c, self.max_target_c);
        if !self.fallback_temp_c.is_finite() {
            self.fallback_temp_c = Self::default().fallback_temp_c;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.sampler.sanitize();
        self.responder.sanitize();
        self.control.sanitize();
    }
}
