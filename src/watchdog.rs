// src/watchdog.rs - Supervision of loop liveness, web health and CPU thermals
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::hardware::{CpuThermal, SystemControl};
use crate::machine::{Supervised, TASK_CONTROL, TASK_WEB};
use crate::power::PowerControl;
use crate::state::SharedState;

const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Tracks the control loop's sample counter. Trips when the counter has not
/// moved for `limit` consecutive observations; any movement resets the run.
#[derive(Debug)]
pub struct StallMonitor {
    limit: u32,
    last: Option<u64>,
    stalled: u32,
}

impl StallMonitor {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            last: None,
            stalled: 0,
        }
    }

    pub fn observe(&mut self, counter: u64) -> bool {
        if self.last == Some(counter) {
            self.stalled += 1;
        } else {
            self.stalled = 0;
        }
        self.last = Some(counter);
        self.stalled >= self.limit
    }
}

/// Trips after `limit` consecutive failing observations; one good
/// observation resets the run. Used for the health probe and the thermal
/// ceiling.
#[derive(Debug)]
pub struct ConsecutiveMonitor {
    limit: u32,
    count: u32,
}

impl ConsecutiveMonitor {
    pub fn new(limit: u32) -> Self {
        Self { limit, count: 0 }
    }

    pub fn observe(&mut self, failing: bool) -> bool {
        if failing {
            self.count += 1;
        } else {
            self.count = 0;
        }
        self.count >= self.limit
    }
}

pub struct Watchdog {
    state: SharedState,
    power: PowerControl,
    system: Arc<dyn SystemControl>,
    cpu: Box<dyn CpuThermal>,
    http: reqwest::Client,
    health_url: String,
    stall: StallMonitor,
    probe: ConsecutiveMonitor,
    thermal: ConsecutiveMonitor,
    cpu_hot_c: f64,
}

impl Watchdog {
    pub fn new(
        state: SharedState,
        power: PowerControl,
        system: Arc<dyn SystemControl>,
        cpu: Box<dyn CpuThermal>,
        config: &Config,
    ) -> Result<Self, reqwest::Error> {
        let wd = &config.watchdog;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(wd.probe_timeout_secs))
            .build()?;
        Ok(Self {
            state,
            power,
            system,
            cpu,
            http,
            health_url: format!("http://127.0.0.1:{}/healthcheck", config.web.port),
            stall: StallMonitor::new(wd.stall_ticks),
            probe: ConsecutiveMonitor::new(wd.probe_failures),
            thermal: ConsecutiveMonitor::new(wd.cpu_hot_ticks),
            cpu_hot_c: wd.cpu_hot_c,
        })
    }

    async fn probe_health(&self) -> bool {
        match self.http.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Supervise until any task dies, then tear everything down with the
    /// heater forced off.
    pub async fn run(mut self, tasks: Vec<Supervised>) {
        let mut interval = tokio::time::interval(WATCHDOG_TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval's first tick completes immediately; consume it so the
        // loops get one full tick of headroom before supervision starts.
        interval.tick().await;

        loop {
            interval.tick().await;

            if let Some(dead) = tasks.iter().find(|t| t.is_finished()) {
                tracing::error!("{} task is no longer alive", dead.name());
                break;
            }

            let counter = self.state.sample_count().await;
            if self.stall.observe(counter) {
                tracing::error!("control loop stalled, terminating it");
                if let Some(task) = tasks.iter().find(|t| t.name() == TASK_CONTROL) {
                    task.terminate();
                }
            }

            let healthy = self.probe_health().await;
            if self.probe.observe(!healthy) {
                tracing::error!("web interface unresponsive, terminating it");
                if let Some(task) = tasks.iter().find(|t| t.name() == TASK_WEB) {
                    task.terminate();
                }
            }

            let too_hot = self
                .cpu
                .cpu_celsius()
                .map(|c| c > self.cpu_hot_c)
                .unwrap_or(false);
            if self.thermal.observe(too_hot) {
                tracing::error!("CPU too hot, shutting the host down");
                self.system.shutdown();
            }
        }

        for task in &tasks {
            task.terminate();
        }
        self.power.gotosleep().await;
        tracing::info!("watchdog teardown complete, heater off");
    }
}
