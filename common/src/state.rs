use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{round_tenth, Readings};

pub trait TemperatureProvider: Send + Sync {
    fn current(&self) -> f32;
    fn target(&self) -> f32;
    fn set_target(&self, target_c: f32);

    fn snapshot(&self) -> Readings {
        Readings {
            current_c: self.current(),
            target_c: self.target(),
        }
    }
}

#[derive(Debug)]
pub struct ControlState {
    inner: Mutex<Readings>,
}

impl ControlState {
    pub fn new(initial_reading: Option<f32>, fallback_c: f32, target_c: f32) -> Self {
        let current_c = initial_reading.map(round_tenth).unwrap_or(fallback_c);
        Self {
            inner: Mutex::new(Readings {
                current_c,
                target_c,
            }),
        }
    }

    pub fn commit_current(&self, reading_c: f32) -> f32 {
        let rounded = round_tenth(reading_c);
        self.lock().current_c = rounded;
        rounded
    }

    fn lock(&self) -> MutexGuard<'_, Readings> {
        // The guarded value is two plain floats, so a panic elsewhere cannot
        // leave it half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TemperatureProvider for ControlState {
    fn current(&self) -> f32 {
        self.lock().current_c
    }

    fn target(&self) -> f32 {
        self.lock().target_c
    }

    fn set_target(&self, target_c: f32) {
        self.lock().target_c = target_c;
    }

    fn snapshot(&self) -> Readings {
        *self.lock()
    }
}
