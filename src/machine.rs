// src/machine.rs - Wires state, hardware and loops into a running machine
use std::future::Future;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::actuator::HeaterLoop;
use crate::config::{Config, ConfigError};
use crate::control::ControlLoop;
use crate::hardware::{HardwareError, HardwareSet};
use crate::power::{ButtonLoop, PowerControl};
use crate::scheduler::{Scheduler, SystemClock};
use crate::state::{ControlState, SharedState};
use crate::watchdog::Watchdog;
use crate::web;

pub const TASK_CONTROL: &str = "control";
pub const TASK_HEATER: &str = "heater";
pub const TASK_BUTTON: &str = "button";
pub const TASK_SCHEDULER: &str = "scheduler";
pub const TASK_WEB: &str = "web";

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("web bind error: {0}")]
    Bind(#[from] std::io::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A spawned loop with its own cooperative shutdown channel. `terminate`
/// signals first, then aborts; the watchdog's final `gotosleep` restores the
/// safe actuator state regardless of where an abort landed.
pub struct Supervised {
    name: &'static str,
    handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Supervised {
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(task(shutdown_rx));
        tracing::info!("started {} task", name);
        Self {
            name,
            handle,
            shutdown_tx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn request_stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn terminate(&self) {
        self.request_stop();
        self.handle.abort();
    }
}

pub struct Machine {
    config: Config,
    state: SharedState,
    power: PowerControl,
    hardware: HardwareSet,
}

impl Machine {
    pub fn new(config: Config, hardware: HardwareSet) -> Result<Self, MachineError> {
        config.validate()?;
        let state = SharedState::new(ControlState::from_config(&config));
        let power = PowerControl::new(
            state.clone(),
            hardware.heater.clone(),
            hardware.indicator.clone(),
        );
        Ok(Self {
            config,
            state,
            power,
            hardware,
        })
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn power(&self) -> PowerControl {
        self.power.clone()
    }

    /// Apply the startup power state, bind the web interface and spawn all
    /// supervised loops. Returns the task set and the watchdog that owns the
    /// rest of the process lifetime.
    pub async fn start(self) -> Result<(Vec<Supervised>, Watchdog), MachineError> {
        self.power.apply_initial().await;

        let HardwareSet {
            sensor,
            heater,
            indicator: _,
            button,
            cpu,
            system,
        } = self.hardware;

        let control = ControlLoop::new(self.state.clone(), self.power.clone(), sensor, &self.config);
        let heater_loop = HeaterLoop::new(self.state.clone(), heater, self.config.control.boundary);
        let button_loop = ButtonLoop::new(self.power.clone(), button);
        let scheduler = Scheduler::new(
            self.state.clone(),
            self.power.clone(),
            Box::new(SystemClock),
        );

        let app = web::api::create_router(web::api::app_state(
            self.state.clone(),
            self.power.clone(),
            system.clone(),
        ));
        let addr = format!("{}:{}", self.config.web.bind_address, self.config.web.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("web interface listening on http://{}", listener.local_addr()?);

        let tasks = vec![
            Supervised::spawn(TASK_CONTROL, |rx| control.run(rx)),
            Supervised::spawn(TASK_HEATER, |rx| heater_loop.run(rx)),
            Supervised::spawn(TASK_BUTTON, |rx| button_loop.run(rx)),
            Supervised::spawn(TASK_SCHEDULER, |rx| scheduler.run(rx)),
            Supervised::spawn(TASK_WEB, move |mut rx| async move {
                let shutdown = async move {
                    let _ = rx.recv().await;
                };
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    tracing::error!("web server error: {}", e);
                }
            }),
        ];

        let watchdog = Watchdog::new(
            self.state.clone(),
            self.power.clone(),
            system,
            cpu,
            &self.config,
        )?;
        Ok((tasks, watchdog))
    }
}
