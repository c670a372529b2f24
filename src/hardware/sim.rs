// src/hardware/sim.rs - Simulated devices for tests and the --simulate run mode
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use crate::config::Config;
use crate::hardware::{
    shared_output, BinaryOutput, CpuThermal, HardwareError, HardwareSet, PowerButton, SystemControl,
    TempSensor,
};

/// Scripted sensor: pops queued readings, then repeats the steady value.
/// The control handle can be cloned and driven from a test while the loop
/// owns the sensor itself.
pub struct ScriptedSensor {
    control: SensorControl,
}

#[derive(Clone)]
pub struct SensorControl {
    inner: Arc<Mutex<SensorScript>>,
}

struct SensorScript {
    queue: VecDeque<Result<f64, &'static str>>,
    steady: Result<f64, &'static str>,
}

impl ScriptedSensor {
    pub fn steady(celsius: f64) -> (Self, SensorControl) {
        let control = SensorControl {
            inner: Arc::new(Mutex::new(SensorScript {
                queue: VecDeque::new(),
                steady: Ok(celsius),
            })),
        };
        (
            Self {
                control: control.clone(),
            },
            control,
        )
    }
}

impl SensorControl {
    pub fn set_steady(&self, celsius: f64) {
        self.inner.lock().unwrap().steady = Ok(celsius);
    }

    pub fn fail_steady(&self, reason: &'static str) {
        self.inner.lock().unwrap().steady = Err(reason);
    }

    pub fn push_reading(&self, celsius: f64) {
        self.inner.lock().unwrap().queue.push_back(Ok(celsius));
    }

    pub fn push_failure(&self, reason: &'static str) {
        self.inner.lock().unwrap().queue.push_back(Err(reason));
    }
}

#[async_trait]
impl TempSensor for ScriptedSensor {
    async fn read_celsius(&mut self) -> Result<f64, HardwareError> {
        let mut script = self.control.inner.lock().unwrap();
        let next = script.queue.pop_front().unwrap_or(script.steady);
        next.map_err(HardwareError::SensorFault)
    }
}

/// First-order boiler model driven by the (shared) heater output state.
/// Used by `--simulate` so the whole host runs against believable physics.
pub struct SimBoiler {
    heater: OutputLog,
    temp: f64,
    last: Instant,
}

impl SimBoiler {
    const AMBIENT_C: f64 = 21.0;
    const HEAT_RATE_C_PER_S: f64 = 2.0;
    const COOL_TIME_CONSTANT_S: f64 = 300.0;

    pub fn new(heater: OutputLog) -> Self {
        Self {
            heater,
            temp: Self::AMBIENT_C,
            last: Instant::now(),
        }
    }
}

#[async_trait]
impl TempSensor for SimBoiler {
    async fn read_celsius(&mut self) -> Result<f64, HardwareError> {
        let dt = self.last.elapsed().as_secs_f64();
        self.last = Instant::now();
        if self.heater.is_on() {
            self.temp += Self::HEAT_RATE_C_PER_S * dt;
        }
        self.temp -= (self.temp - Self::AMBIENT_C) / Self::COOL_TIME_CONSTANT_S * dt;
        Ok(self.temp)
    }
}

/// Output that records every `set_on` call with a timestamp. The log handle
/// is cloneable so tests and the boiler model can observe the pin.
pub struct RecordingOutput {
    log: OutputLog,
}

#[derive(Clone)]
pub struct OutputLog {
    state: Arc<AtomicBool>,
    events: Arc<Mutex<Vec<(tokio::time::Instant, bool)>>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicBool::new(false)),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_on(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<(tokio::time::Instant, bool)> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingOutput {
    pub fn new() -> (Self, OutputLog) {
        let log = OutputLog::new();
        (Self { log: log.clone() }, log)
    }
}

impl BinaryOutput for RecordingOutput {
    fn set_on(&mut self, on: bool) {
        self.log.state.store(on, Ordering::SeqCst);
        self.log
            .events
            .lock()
            .unwrap()
            .push((tokio::time::Instant::now(), on));
    }

    fn is_on(&self) -> bool {
        self.log.is_on()
    }
}

/// Button whose poll results are scripted; reads false once the script runs
/// dry.
pub struct ScriptedButton {
    control: ButtonControl,
}

#[derive(Clone)]
pub struct ButtonControl {
    polls: Arc<Mutex<VecDeque<bool>>>,
}

impl ScriptedButton {
    pub fn new() -> (Self, ButtonControl) {
        let control = ButtonControl {
            polls: Arc::new(Mutex::new(VecDeque::new())),
        };
        (
            Self {
                control: control.clone(),
            },
            control,
        )
    }
}

impl ButtonControl {
    pub fn hold_for(&self, polls: usize) {
        let mut queue = self.polls.lock().unwrap();
        for _ in 0..polls {
            queue.push_back(true);
        }
        queue.push_back(false);
    }
}

impl PowerButton for ScriptedButton {
    fn is_pressed(&mut self) -> bool {
        self.control.polls.lock().unwrap().pop_front().unwrap_or(false)
    }
}

/// CPU thermal source with an externally settable value.
pub struct SimCpu {
    control: CpuControl,
}

#[derive(Clone)]
pub struct CpuControl {
    celsius: Arc<Mutex<f64>>,
}

impl SimCpu {
    pub fn at(celsius: f64) -> (Self, CpuControl) {
        let control = CpuControl {
            celsius: Arc::new(Mutex::new(celsius)),
        };
        (
            Self {
                control: control.clone(),
            },
            control,
        )
    }
}

impl CpuControl {
    pub fn set(&self, celsius: f64) {
        *self.celsius.lock().unwrap() = celsius;
    }
}

impl CpuThermal for SimCpu {
    fn cpu_celsius(&mut self) -> Option<f64> {
        Some(*self.control.celsius.lock().unwrap())
    }
}

/// SystemControl that only counts invocations.
#[derive(Clone, Default)]
pub struct RecordingSystemControl {
    reboots: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl RecordingSystemControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl SystemControl for RecordingSystemControl {
    fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        tracing::warn!("simulated reboot requested");
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        tracing::warn!("simulated shutdown requested");
    }
}

/// Fully simulated device set for `--simulate`.
pub fn build(_config: &Config) -> HardwareSet {
    let (heater, heater_log) = RecordingOutput::new();
    let (indicator, _) = RecordingOutput::new();
    let (button, _) = ScriptedButton::new();
    let (cpu, _) = SimCpu::at(45.0);

    HardwareSet {
        sensor: Box::new(SimBoiler::new(heater_log)),
        heater: shared_output(heater),
        indicator: shared_output(indicator),
        button: Box::new(button),
        cpu: Box::new(cpu),
        system: Arc::new(RecordingSystemControl::new()),
    }
}
