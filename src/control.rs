// src/control.rs - PID sampling loop with sensor-fault escalation
use std::time::Duration;

use pid::Pid;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::{Config, PidGains};
use crate::hardware::TempSensor;
use crate::history::HistoryBuffer;
use crate::power::PowerControl;
use crate::state::SharedState;

/// Result of one control cycle.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    /// The fault window filled up; the loop must exit after forcing the
    /// heater off. Fired at most once per loop lifetime.
    SensorFailure,
}

pub struct ControlLoop {
    state: SharedState,
    power: PowerControl,
    sensor: Box<dyn TempSensor>,
    pid: Pid<f64>,
    cold: PidGains,
    warm: PidGains,
    boundary: f64,
    fault_limit: usize,
    integral_range: f64,
    period: Duration,
    pid_hist: HistoryBuffer<f64>,
    temp_hist: HistoryBuffer<f64>,
    fault_flags: HistoryBuffer<u8>,
    temp: f64,
    last_settemp: u32,
    sample: u64,
}

impl ControlLoop {
    pub fn new(
        state: SharedState,
        power: PowerControl,
        sensor: Box<dyn TempSensor>,
        config: &Config,
    ) -> Self {
        let control = &config.control;
        let boundary = control.boundary;
        let mut pid = Pid::new(f64::from(control.brew_temp), boundary);
        pid.p(config.pid_cold.kp, boundary);
        pid.i(config.pid_cold.ki, boundary);
        pid.d(config.pid_cold.kd, boundary);

        Self {
            state,
            power,
            sensor,
            pid,
            cold: config.pid_cold,
            warm: config.pid_warm,
            boundary,
            fault_limit: control.sensor_fault_limit,
            integral_range: control.integral_range_c,
            period: Duration::from_secs_f64(control.time_sample),
            pid_hist: HistoryBuffer::filled(control.pid_hist_len, 0.0),
            temp_hist: HistoryBuffer::filled(control.temp_hist_len, 0.0),
            fault_flags: HistoryBuffer::filled(control.temp_hist_len, 0),
            temp: 25.0,
            last_settemp: control.brew_temp,
            sample: 0,
        }
    }

    /// One sampling cycle: read, account faults, average, tune, control,
    /// publish. Timing is the caller's job.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        match self.sensor.read_celsius().await {
            Ok(celsius) => {
                self.temp = celsius;
                self.temp_hist.push(celsius);
                self.fault_flags.push(0);
            }
            Err(e) => {
                // Keep the stale temperature history; only the flag advances.
                tracing::warn!("sensor read failed: {}", e);
                self.fault_flags.push(1);
            }
        }

        if self.fault_flags.count() >= self.fault_limit {
            tracing::error!("temperature sensor failure, forcing heater off");
            self.power.gotosleep().await;
            return CycleOutcome::SensorFailure;
        }

        let avgtemp = self.temp_hist.mean();
        let brewtemp = self.state.brewtemp().await;

        // Aggressive gains while the boiler is well below the setpoint,
        // gentle ones near it. Re-selected every cycle, no hysteresis.
        let gains = if avgtemp <= 0.9 * f64::from(brewtemp) {
            self.cold
        } else {
            self.warm
        };
        self.pid.p(gains.kp, self.boundary);
        self.pid.i(gains.ki, self.boundary);
        self.pid.d(gains.kd, self.boundary);

        if brewtemp != self.last_settemp {
            self.pid.setpoint(f64::from(brewtemp));
            self.last_settemp = brewtemp;
            tracing::info!("setpoint changed to {} °C", brewtemp);
        }

        // Far from the setpoint the proportional term saturates the output
        // anyway; holding the integral at zero there keeps it from winding
        // up against the clamp during warm-up.
        if (avgtemp - self.pid.setpoint).abs() > self.integral_range {
            self.pid.reset_integral_term();
        }

        let output = self.pid.next_control_output(avgtemp);
        self.pid_hist.push(output.output);
        let avgpid = self.pid_hist.mean();

        self.state.set_sample_count(self.sample).await;
        self.state.set_temp(self.temp).await;
        self.state.set_terms(output.p, output.i, output.d).await;
        self.state.set_avgtemp(round2(avgtemp)).await;
        self.state.set_pidval(round2(output.output)).await;
        self.state.set_avgpid(round2(avgpid)).await;
        self.sample += 1;

        CycleOutcome::Continue
    }

    /// Run until shutdown or sensor failure. The next wake is computed from
    /// the previous tick so variable processing time does not drift the
    /// sampling cadence.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut last_tick = Instant::now();
        loop {
            if self.run_cycle().await == CycleOutcome::SensorFailure {
                break;
            }
            let next = last_tick + self.period;
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("control loop shutting down");
                    break;
                }
                _ = tokio::time::sleep_until(next) => {}
            }
            last_tick = Instant::now();
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
