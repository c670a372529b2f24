// src/config.rs - Startup configuration for the boiler host
use std::fs::File;
use std::io::Read;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub pid_cold: PidGains,

    #[serde(default = "PidGains::default_warm")]
    pub pid_warm: PidGains,

    #[serde(default)]
    pub pins: PinConfig,

    #[serde(default)]
    pub spi: SpiConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            pid_cold: PidGains::default(),
            pid_warm: PidGains::default_warm(),
            pins: PinConfig::default(),
            spi: SpiConfig::default(),
            schedule: ScheduleConfig::default(),
            web: WebConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

/// Core control-loop parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Brew setpoint in whole °C. Must stay within 80..=120.
    #[serde(default = "default_brew_temp")]
    pub brew_temp: u32,

    /// Whether the machine starts awake.
    #[serde(default)]
    pub initial_on: bool,

    /// PID sampling period in seconds.
    #[serde(default = "default_time_sample")]
    pub time_sample: f64,

    /// Maximum PID output magnitude; also the time-proportioning scale.
    #[serde(default = "default_boundary")]
    pub boundary: f64,

    #[serde(default = "default_pid_hist_len")]
    pub pid_hist_len: usize,

    #[serde(default = "default_temp_hist_len")]
    pub temp_hist_len: usize,

    /// Fault flags within one temperature-history window that declare the
    /// sensor dead.
    #[serde(default = "default_sensor_fault_limit")]
    pub sensor_fault_limit: usize,

    /// Error band in °C outside which the integral term is reset, so a cold
    /// start does not wind the integrator up against the output clamp.
    #[serde(default = "default_integral_range_c")]
    pub integral_range_c: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            brew_temp: default_brew_temp(),
            initial_on: false,
            time_sample: default_time_sample(),
            boundary: default_boundary(),
            pid_hist_len: default_pid_hist_len(),
            temp_hist_len: default_temp_hist_len(),
            sensor_fault_limit: default_sensor_fault_limit(),
            integral_range_c: default_integral_range_c(),
        }
    }
}

/// One PID gain triple. Two sets exist: an aggressive one for a cold boiler
/// and a gentle one near the setpoint.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PidGains {
    #[serde(default = "default_cold_kp")]
    pub kp: f64,
    #[serde(default = "default_cold_ki")]
    pub ki: f64,
    #[serde(default = "default_cold_kd")]
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: default_cold_kp(),
            ki: default_cold_ki(),
            kd: default_cold_kd(),
        }
    }
}

impl PidGains {
    pub fn default_warm() -> Self {
        Self {
            kp: 2.5,
            ki: 0.2,
            kd: 20.0,
        }
    }
}

/// BCM pin assignments.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PinConfig {
    #[serde(default = "default_pin_mainswitch")]
    pub mainswitch: u8,
    #[serde(default = "default_pin_powerled")]
    pub powerled: u8,
    #[serde(default = "default_pin_heat")]
    pub heat: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            mainswitch: default_pin_mainswitch(),
            powerled: default_pin_powerled(),
            heat: default_pin_heat(),
        }
    }
}

/// SPI bus carrying the thermocouple amplifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpiConfig {
    #[serde(default)]
    pub bus: u8,
    #[serde(default)]
    pub slave_select: u8,
    #[serde(default = "default_spi_clock_hz")]
    pub clock_hz: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            slave_select: 0,
            clock_hz: default_spi_clock_hz(),
        }
    }
}

/// Daily wake/sleep schedule defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_wake_time")]
    pub wake_time: String,
    #[serde(default = "default_sleep_time")]
    pub sleep_time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            wake_time: default_wake_time(),
            sleep_time: default_sleep_time(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    /// Consecutive ticks without control-loop progress before termination.
    #[serde(default = "default_watchdog_limit")]
    pub stall_ticks: u32,
    /// Consecutive failed health probes before the web task is terminated.
    #[serde(default = "default_watchdog_limit")]
    pub probe_failures: u32,
    /// Health probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// CPU temperature ceiling in °C.
    #[serde(default = "default_cpu_hot_c")]
    pub cpu_hot_c: f64,
    /// Consecutive over-ceiling ticks before the host is shut down.
    #[serde(default = "default_watchdog_limit")]
    pub cpu_hot_ticks: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stall_ticks: default_watchdog_limit(),
            probe_failures: default_watchdog_limit(),
            probe_timeout_secs: default_probe_timeout(),
            cpu_hot_c: default_cpu_hot_c(),
            cpu_hot_ticks: default_watchdog_limit(),
        }
    }
}

// Default value functions
fn default_brew_temp() -> u32 { 100 }
fn default_time_sample() -> f64 { 1.1 }
fn default_boundary() -> f64 { 100.0 }
fn default_pid_hist_len() -> usize { 10 }
fn default_temp_hist_len() -> usize { 8 }
fn default_sensor_fault_limit() -> usize { 5 }
fn default_integral_range_c() -> f64 { 10.0 }
fn default_cold_kp() -> f64 { 2.9 }
fn default_cold_ki() -> f64 { 0.3 }
fn default_cold_kd() -> f64 { 40.0 }
fn default_pin_mainswitch() -> u8 { 21 }
fn default_pin_powerled() -> u8 { 23 }
fn default_pin_heat() -> u8 { 26 }
fn default_spi_clock_hz() -> u32 { 500_000 }
fn default_wake_time() -> String { "06:30".to_string() }
fn default_sleep_time() -> String { "08:30".to_string() }
fn default_web_port() -> u16 { 5000 }
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_watchdog_limit() -> u32 { 10 }
fn default_probe_timeout() -> u64 { 2 }
fn default_cpu_hot_c() -> f64 { 70.0 }

/// Whole-°C setpoint range the boiler accepts.
pub const BREWTEMP_MIN: u32 = 80;
pub const BREWTEMP_MAX: u32 = 120;

/// Parse a "HH:MM" schedule time.
pub fn parse_clock_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ConfigError::Invalid(format!("not a valid HH:MM time: {value:?}")))
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(BREWTEMP_MIN..=BREWTEMP_MAX).contains(&self.control.brew_temp) {
            return Err(ConfigError::Invalid(format!(
                "brew_temp {} outside {}..={} °C",
                self.control.brew_temp, BREWTEMP_MIN, BREWTEMP_MAX
            )));
        }
        if self.control.time_sample <= 0.0 {
            return Err(ConfigError::Invalid("time_sample must be positive".into()));
        }
        if self.control.boundary <= 0.0 {
            return Err(ConfigError::Invalid("boundary must be positive".into()));
        }
        if self.control.pid_hist_len == 0 || self.control.temp_hist_len == 0 {
            return Err(ConfigError::Invalid("history lengths must be non-zero".into()));
        }
        if self.control.sensor_fault_limit == 0
            || self.control.sensor_fault_limit > self.control.temp_hist_len
        {
            return Err(ConfigError::Invalid(
                "sensor_fault_limit must be within the temperature history window".into(),
            ));
        }
        parse_clock_time(&self.schedule.wake_time)?;
        parse_clock_time(&self.schedule.sleep_time)?;
        Ok(())
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(config_path: &str) -> Result<Config, ConfigError> {
    let mut file = File::open(config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    tracing::info!("Loaded configuration from {}", config_path);
    Ok(config)
}
