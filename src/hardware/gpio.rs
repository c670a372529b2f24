// src/hardware/gpio.rs - rppal-backed devices for the Raspberry Pi build
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use sysinfo::Components;

use crate::config::Config;
use crate::hardware::{
    shared_output, BinaryOutput, CpuThermal, HardwareError, HardwareSet, PowerButton, SystemControl,
    TempSensor,
};

pub struct GpioOutput {
    pin: OutputPin,
}

impl GpioOutput {
    pub fn new(pin: OutputPin) -> Self {
        Self { pin }
    }
}

impl BinaryOutput for GpioOutput {
    fn set_on(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    fn is_on(&self) -> bool {
        self.pin.is_set_high()
    }
}

/// Main switch wired active-low against the internal pull-up.
pub struct GpioButton {
    pin: InputPin,
}

impl GpioButton {
    pub fn new(pin: InputPin) -> Self {
        Self { pin }
    }
}

impl PowerButton for GpioButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low()
    }
}

/// MAX31855 thermocouple amplifier on SPI.
///
/// The device clocks out a 32-bit frame: bits 31..18 are the thermocouple
/// temperature as a signed 14-bit value in 0.25 °C steps, bit 16 is the
/// fault summary, and bits 2..0 identify the fault.
pub struct Max31855 {
    spi: Spi,
}

impl Max31855 {
    pub fn new(spi: Spi) -> Self {
        Self { spi }
    }

    fn decode(frame: u32) -> Result<f64, HardwareError> {
        if frame & 0x0001_0000 != 0 {
            let detail = if frame & 0x0000_0001 != 0 {
                "open circuit"
            } else if frame & 0x0000_0002 != 0 {
                "short to GND"
            } else if frame & 0x0000_0004 != 0 {
                "short to VCC"
            } else {
                "unknown fault"
            };
            return Err(HardwareError::SensorFault(detail));
        }
        let mut raw = ((frame >> 18) & 0x3FFF) as i32;
        if raw & 0x2000 != 0 {
            raw -= 0x4000;
        }
        Ok(f64::from(raw) * 0.25)
    }
}

#[async_trait]
impl TempSensor for Max31855 {
    async fn read_celsius(&mut self) -> Result<f64, HardwareError> {
        let mut buf = [0u8; 4];
        self.spi.read(&mut buf)?;
        Self::decode(u32::from_be_bytes(buf))
    }
}

/// Host CPU temperature via sysinfo's thermal components.
pub struct SysinfoCpu {
    components: Components,
}

impl SysinfoCpu {
    pub fn new() -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuThermal for SysinfoCpu {
    fn cpu_celsius(&mut self) -> Option<f64> {
        self.components.refresh();
        self.components
            .iter()
            .find(|c| c.label().to_ascii_lowercase().contains("cpu"))
            .or_else(|| self.components.iter().next())
            .map(|c| f64::from(c.temperature()))
    }
}

/// Reboot/shutdown through the host's own utilities.
pub struct OsSystemControl;

impl SystemControl for OsSystemControl {
    fn reboot(&self) {
        if let Err(e) = Command::new("reboot").spawn() {
            tracing::error!("failed to invoke reboot: {}", e);
        }
    }

    fn shutdown(&self) {
        if let Err(e) = Command::new("shutdown").args(["-h", "now"]).spawn() {
            tracing::error!("failed to invoke shutdown: {}", e);
        }
    }
}

fn spi_bus(bus: u8) -> Result<Bus, HardwareError> {
    match bus {
        0 => Ok(Bus::Spi0),
        1 => Ok(Bus::Spi1),
        2 => Ok(Bus::Spi2),
        other => Err(HardwareError::Unavailable(format!("no SPI bus {other}"))),
    }
}

fn spi_slave(select: u8) -> Result<SlaveSelect, HardwareError> {
    match select {
        0 => Ok(SlaveSelect::Ss0),
        1 => Ok(SlaveSelect::Ss1),
        2 => Ok(SlaveSelect::Ss2),
        other => Err(HardwareError::Unavailable(format!("no slave select {other}"))),
    }
}

/// Bring up the full rppal-backed device set.
pub fn build(config: &Config) -> Result<HardwareSet, HardwareError> {
    let gpio = Gpio::new()?;
    let heater = gpio.get(config.pins.heat)?.into_output_low();
    let indicator = gpio.get(config.pins.powerled)?.into_output_low();
    let button = gpio.get(config.pins.mainswitch)?.into_input_pullup();
    let spi = Spi::new(
        spi_bus(config.spi.bus)?,
        spi_slave(config.spi.slave_select)?,
        config.spi.clock_hz,
        Mode::Mode0,
    )?;

    Ok(HardwareSet {
        sensor: Box::new(Max31855::new(spi)),
        heater: shared_output(GpioOutput::new(heater)),
        indicator: shared_output(GpioOutput::new(indicator)),
        button: Box::new(GpioButton::new(button)),
        cpu: Box::new(SysinfoCpu::new()),
        system: Arc::new(OsSystemControl),
    })
}
