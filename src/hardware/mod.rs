// src/hardware/mod.rs - Trait seams between the control loops and the machine
pub mod gpio;
pub mod sim;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),
    #[error("thermocouple fault: {0}")]
    SensorFault(&'static str),
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Boiler temperature sensor. A read is bounded-duration and may fail; the
/// control loop tolerates failures up to its fault window.
#[async_trait]
pub trait TempSensor: Send {
    async fn read_celsius(&mut self) -> Result<f64, HardwareError>;
}

/// A binary hardware output (heater relay, power indicator).
pub trait BinaryOutput: Send {
    fn set_on(&mut self, on: bool);
    fn is_on(&self) -> bool;
}

/// The front-panel power button, active when held.
pub trait PowerButton: Send {
    fn is_pressed(&mut self) -> bool;
}

/// Host CPU temperature, for the thermal watchdog.
pub trait CpuThermal: Send {
    fn cpu_celsius(&mut self) -> Option<f64>;
}

/// OS-level power control invoked by the watchdog and the HTTP surface.
pub trait SystemControl: Send + Sync {
    fn reboot(&self);
    fn shutdown(&self);
}

/// Outputs are shared between the power state machine and the heater loop.
pub type SharedOutput = Arc<Mutex<dyn BinaryOutput>>;

pub fn shared_output(output: impl BinaryOutput + 'static) -> SharedOutput {
    Arc::new(Mutex::new(output))
}

/// Everything the machine needs from the outside world, bundled so `main`
/// can hand over either real rppal-backed devices or the simulated set.
pub struct HardwareSet {
    pub sensor: Box<dyn TempSensor>,
    pub heater: SharedOutput,
    pub indicator: SharedOutput,
    pub button: Box<dyn PowerButton>,
    pub cpu: Box<dyn CpuThermal>,
    pub system: Arc<dyn SystemControl>,
}
