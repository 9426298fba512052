use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    config::SamplerConfig,
    error::SamplerError,
    hardware::{Actuator, TemperatureSensor},
    state::{ControlState, TemperatureProvider},
    types::ActuatorState,
};

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(20);

pub trait TickHook: Send {
    fn on_tick(&mut self) -> Result<(), SamplerError>;

    fn on_stop(&mut self) {}
}

pub struct NoopHook;

impl TickHook for NoopHook {
    fn on_tick(&mut self) -> Result<(), SamplerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub reading: Option<f32>,
    pub current_c: f32,
    pub target_c: f32,
    pub output: ActuatorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerPhase {
    Idle,
    Running,
    Stopped,
}

pub struct SamplerTask<S, A, H> {
    sensor: S,
    actuator: Arc<Mutex<A>>,
    hook: H,
    state: Arc<ControlState>,
    stop: Arc<AtomicBool>,
    config: SamplerConfig,
    last_output: Option<ActuatorState>,
}

impl<S, A, H> SamplerTask<S, A, H>
where
    S: TemperatureSensor,
    A: Actuator,
    H: TickHook,
{
    pub fn new(
        sensor: S,
        actuator: Arc<Mutex<A>>,
        hook: H,
        state: Arc<ControlState>,
        stop: Arc<AtomicBool>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            sensor,
            actuator,
            hook,
            state,
            stop,
            config,
            last_output: None,
        }
    }

    pub fn tick(&mut self) -> Result<TickReport, SamplerError> {
        let reading = self.sensor.read();
        match reading {
            Some(value) => {
                let committed = self.state.commit_current(value);
                debug!("temperature update: {committed:.1}°C");
            }
            None => warn!("temperature sensor returned no reading; keeping last value"),
        }

        let readings = self.state.snapshot();
        let output = ActuatorState::decide(readings.current_c, readings.target_c);
        self.drive(output)?;

        self.hook.on_tick()?;

        Ok(TickReport {
            reading,
            current_c: readings.current_c,
            target_c: readings.target_c,
            output,
        })
    }

    pub fn step(&mut self) -> Duration {
        let started = Instant::now();
        match self.tick() {
            Ok(_) => self.config.period().saturating_sub(started.elapsed()),
            Err(err) => {
                warn!(
                    "sampler tick failed: {err}; backing off for {} ms",
                    self.config.error_backoff_ms
                );
                self.config.error_backoff()
            }
        }
    }

    pub fn run(mut self) {
        info!("temperature sampling started");

        while !self.stop.load(Ordering::Acquire) {
            let delay = self.step();
            self.pause(delay);
        }

        if let Err(err) = lock_actuator(&self.actuator).drive(ActuatorState::Idle) {
            warn!("failed to switch actuator off on exit: {err}");
        }
        self.hook.on_stop();
        info!("temperature sampling stopped");
    }

    fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.stop.load(Ordering::Acquire) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            thread::sleep(left.min(STOP_CHECK_INTERVAL));
        }
    }

    fn drive(&mut self, output: ActuatorState) -> Result<(), SamplerError> {
        let mut actuator = lock_actuator(&self.actuator);
        // Shutdown forces the output off under this same lock.
        if self.stop.load(Ordering::Acquire) {
            return Ok(());
        }
        actuator.drive(output)?;

        if self.last_output != Some(output) {
            info!("actuator -> {}", output.as_str());
            self.last_output = Some(output);
        }
        Ok(())
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

pub struct Sampler<S, A, H> {
    pending: Option<SamplerTask<S, A, H>>,
    worker: Option<Worker>,
    actuator: Arc<Mutex<A>>,
    stop: Arc<AtomicBool>,
    config: SamplerConfig,
    phase: SamplerPhase,
}

impl<S, A, H> Sampler<S, A, H>
where
    S: TemperatureSensor + 'static,
    A: Actuator + 'static,
    H: TickHook + 'static,
{
    pub fn new(
        sensor: S,
        actuator: A,
        hook: H,
        state: Arc<ControlState>,
        config: SamplerConfig,
    ) -> Self {
        let actuator = Arc::new(Mutex::new(actuator));
        let stop = Arc::new(AtomicBool::new(false));
        let task = SamplerTask::new(
            sensor,
            actuator.clone(),
            hook,
            state,
            stop.clone(),
            config.clone(),
        );

        Self {
            pending: Some(task),
            worker: None,
            actuator,
            stop,
            config,
            phase: SamplerPhase::Idle,
        }
    }

    pub fn phase(&self) -> SamplerPhase {
        self.phase
    }

    /// Spawns the sampling thread. Returns `Ok(false)` when it was already
    /// started; a stopped sampler is never restarted.
    pub fn start(&mut self) -> io::Result<bool> {
        let Some(task) = self.pending.take() else {
            warn!("sampler start ignored (phase {:?})", self.phase);
            return Ok(false);
        };

        let (done_tx, done) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("sampler".to_string())
            .spawn(move || {
                task.run();
                let _ = done_tx.send(());
            })?;

        self.worker = Some(Worker { handle, done });
        self.phase = SamplerPhase::Running;
        Ok(true)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);

        if let Err(err) = lock_actuator(&self.actuator).drive(ActuatorState::Idle) {
            warn!("failed to switch actuator off during shutdown: {err}");
        }

        if let Some(worker) = self.worker.take() {
            match worker.done.recv_timeout(self.config.shutdown_grace()) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        warn!("sampler thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "sampler thread still busy after {} ms; detaching",
                        self.config.shutdown_grace_ms
                    );
                }
            }
        }

        self.pending = None;
        self.phase = SamplerPhase::Stopped;
    }
}

impl<S, A, H> Drop for Sampler<S, A, H> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn lock_actuator<A>(actuator: &Mutex<A>) -> std::sync::MutexGuard<'_, A> {
    actuator.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::atomic::AtomicUsize};

    use super::*;
    use crate::error::ActuatorError;
    use pretty_assertions::assert_eq;

    struct ScriptedSensor {
        readings: VecDeque<Option<f32>>,
        repeat: Option<f32>,
    }

    impl ScriptedSensor {
        fn new(readings: &[Option<f32>]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                repeat: None,
            }
        }

        fn constant(value: f32) -> Self {
            Self {
                readings: VecDeque::new(),
                repeat: Some(value),
            }
        }
    }

    impl TemperatureSensor for ScriptedSensor {
        fn read(&mut self) -> Option<f32> {
            self.readings.pop_front().unwrap_or(self.repeat)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingActuator {
        outputs: Arc<Mutex<Vec<ActuatorState>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingActuator {
        fn last(&self) -> Option<ActuatorState> {
            self.outputs.lock().unwrap().last().copied()
        }
    }

    impl Actuator for RecordingActuator {
        fn drive(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ActuatorError::Output("gpio write failed".to_string()));
            }
            self.outputs.lock().unwrap().push(state);
            Ok(())
        }
    }

    struct SlowSensor {
        delay: Duration,
    }

    impl TemperatureSensor for SlowSensor {
        fn read(&mut self) -> Option<f32> {
            thread::sleep(self.delay);
            Some(-18.0)
        }
    }

    #[derive(Clone, Default)]
    struct CountingHook {
        calls: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    impl TickHook for CountingHook {
        fn on_tick(&mut self) -> Result<(), SamplerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SamplerError::Hook("listener vanished".to_string()));
            }
            Ok(())
        }

        fn on_stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn assert_waits_out_period(delay: Duration) {
        let period = SamplerConfig::default().period();
        assert!(delay <= period, "waited {delay:?}");
        assert!(delay > period - Duration::from_millis(200), "waited {delay:?}");
    }

    fn task(
        sensor: ScriptedSensor,
        actuator: RecordingActuator,
        hook: CountingHook,
        state: Arc<ControlState>,
    ) -> SamplerTask<ScriptedSensor, RecordingActuator, CountingHook> {
        SamplerTask::new(
            sensor,
            Arc::new(Mutex::new(actuator)),
            hook,
            state,
            Arc::new(AtomicBool::new(false)),
            SamplerConfig::default(),
        )
    }

    #[test]
    fn missing_reads_keep_last_good_value() {
        let state = Arc::new(ControlState::new(None, 0.0, 20.0));
        let mut task = task(
            ScriptedSensor::new(&[Some(-17.96), None, None, None]),
            RecordingActuator::default(),
            CountingHook::default(),
            state.clone(),
        );

        assert_waits_out_period(task.step());
        assert_eq!(state.current(), -18.0);

        for _ in 0..3 {
            assert_waits_out_period(task.step());
            assert_eq!(state.current(), -18.0);
        }
    }

    #[test]
    fn cools_only_strictly_above_target() {
        let state = Arc::new(ControlState::new(None, 0.0, 20.0));
        let actuator = RecordingActuator::default();
        let mut task = task(
            ScriptedSensor::new(&[Some(20.0), Some(20.1), Some(19.9)]),
            actuator.clone(),
            CountingHook::default(),
            state,
        );

        let outputs: Vec<_> = (0..3).map(|_| task.tick().unwrap().output).collect();
        assert_eq!(
            outputs,
            vec![
                ActuatorState::Idle,
                ActuatorState::Cooling,
                ActuatorState::Idle
            ]
        );
        assert_eq!(*actuator.outputs.lock().unwrap(), outputs);
    }

    #[test]
    fn target_change_applies_on_next_tick() {
        let state = Arc::new(ControlState::new(None, 0.0, 25.0));
        let mut task = task(
            ScriptedSensor::constant(22.0),
            RecordingActuator::default(),
            CountingHook::default(),
            state.clone(),
        );

        assert_eq!(task.tick().unwrap().output, ActuatorState::Idle);
        state.set_target(21.0);
        let report = task.tick().unwrap();
        assert_eq!(report.target_c, 21.0);
        assert_eq!(report.output, ActuatorState::Cooling);
    }

    #[test]
    fn actuator_fault_backs_off_and_recovers() {
        let state = Arc::new(ControlState::new(None, 0.0, 20.0));
        let actuator = RecordingActuator::default();
        let hook = CountingHook::default();
        let mut task = task(
            ScriptedSensor::constant(25.0),
            actuator.clone(),
            hook.clone(),
            state.clone(),
        );

        actuator.failing.store(true, Ordering::SeqCst);
        assert_eq!(task.step(), Duration::from_secs(5));
        assert_eq!(state.current(), 25.0);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);

        actuator.failing.store(false, Ordering::SeqCst);
        assert_waits_out_period(task.step());
        assert_eq!(actuator.last(), Some(ActuatorState::Cooling));
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_fault_backs_off() {
        let state = Arc::new(ControlState::new(None, 0.0, 20.0));
        let hook = CountingHook::default();
        hook.failing.store(true, Ordering::SeqCst);
        let mut task = task(
            ScriptedSensor::constant(10.0),
            RecordingActuator::default(),
            hook.clone(),
            state,
        );

        assert_eq!(task.step(), Duration::from_secs(5));
        assert_eq!(task.step(), Duration::from_secs(5));
        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn start_is_idempotent_and_stop_forces_idle() {
        let state = Arc::new(ControlState::new(None, 0.0, 0.0));
        let actuator = RecordingActuator::default();
        let hook = CountingHook::default();
        let config = SamplerConfig {
            period_ms: 10,
            error_backoff_ms: 50,
            shutdown_grace_ms: 1_000,
        };
        let mut sampler = Sampler::new(
            ScriptedSensor::constant(5.0),
            actuator.clone(),
            hook.clone(),
            state.clone(),
            config,
        );
        assert_eq!(sampler.phase(), SamplerPhase::Idle);

        assert!(sampler.start().unwrap());
        assert!(!sampler.start().unwrap());
        assert_eq!(sampler.phase(), SamplerPhase::Running);

        let deadline = Instant::now() + Duration::from_secs(5);
        while hook.calls.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(hook.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(state.current(), 5.0);
        assert_eq!(actuator.last(), Some(ActuatorState::Cooling));

        sampler.stop();
        assert_eq!(sampler.phase(), SamplerPhase::Stopped);
        assert_eq!(actuator.last(), Some(ActuatorState::Idle));

        let calls_after_stop = hook.calls.load(Ordering::SeqCst);
        assert!(!sampler.start().unwrap());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hook.calls.load(Ordering::SeqCst), calls_after_stop);
        assert_eq!(sampler.phase(), SamplerPhase::Stopped);
    }

    #[test]
    fn slow_sensor_does_not_stretch_the_period() {
        let state = Arc::new(ControlState::new(None, 0.0, 20.0));
        let mut task = SamplerTask::new(
            SlowSensor {
                delay: Duration::from_millis(120),
            },
            Arc::new(Mutex::new(RecordingActuator::default())),
            CountingHook::default(),
            state,
            Arc::new(AtomicBool::new(false)),
            SamplerConfig {
                period_ms: 200,
                ..SamplerConfig::default()
            },
        );

        let delay = task.step();
        assert!(delay <= Duration::from_millis(80), "waited {delay:?}");
    }

    #[test]
    fn stop_interrupts_error_backoff() {
        let state = Arc::new(ControlState::new(None, 0.0, 0.0));
        let actuator = RecordingActuator::default();
        actuator.failing.store(true, Ordering::SeqCst);
        let hook = CountingHook::default();
        let mut sampler = Sampler::new(
            ScriptedSensor::constant(5.0),
            actuator,
            hook.clone(),
            state.clone(),
            SamplerConfig {
                period_ms: 100,
                error_backoff_ms: 5_000,
                shutdown_grace_ms: 500,
            },
        );
        assert!(sampler.start().unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        while state.current() != 5.0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(hook.stops.load(Ordering::SeqCst), 1);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }
}
