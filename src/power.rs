// src/power.rs - Awake/asleep state machine and the front-panel button loop
use std::time::Duration;

use tokio::sync::broadcast;

use crate::hardware::{PowerButton, SharedOutput};
use crate::state::SharedState;

/// How often the button input is polled.
const BUTTON_POLL: Duration = Duration::from_millis(100);
/// Consecutive pressed polls that count as a deliberate hold.
const HOLD_POLLS: u32 = 2;

/// The two power transitions. Both are idempotent, so racing callers
/// (button, scheduler, HTTP) settle on a consistent final state no matter
/// how their writes interleave.
#[derive(Clone)]
pub struct PowerControl {
    state: SharedState,
    heater: SharedOutput,
    indicator: SharedOutput,
}

impl PowerControl {
    pub fn new(state: SharedState, heater: SharedOutput, indicator: SharedOutput) -> Self {
        Self {
            state,
            heater,
            indicator,
        }
    }

    pub async fn wakeup(&self) {
        self.state.set_awake(true).await;
        self.indicator.lock().await.set_on(true);
        tracing::info!("machine awake");
    }

    /// Asleep implies the heater output is OFF; every fatal path funnels
    /// through here.
    pub async fn gotosleep(&self) {
        self.state.set_awake(false).await;
        self.state.set_heating(false).await;
        self.heater.lock().await.set_on(false);
        self.indicator.lock().await.set_on(false);
        tracing::info!("machine asleep, heater off");
    }

    pub async fn toggle(&self) {
        if self.state.is_awake().await {
            self.gotosleep().await;
        } else {
            self.wakeup().await;
        }
    }

    /// Drive the outputs to match the configured startup state.
    pub async fn apply_initial(&self) {
        if self.state.is_awake().await {
            self.wakeup().await;
        } else {
            self.gotosleep().await;
        }
    }
}

/// Polls the main switch; a hold of at least two polls toggles the power
/// state once the button is released.
pub struct ButtonLoop {
    power: PowerControl,
    button: Box<dyn PowerButton>,
}

impl ButtonLoop {
    pub fn new(power: PowerControl, button: Box<dyn PowerButton>) -> Self {
        Self { power, button }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut held: u32 = 0;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("button loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(BUTTON_POLL) => {}
            }
            if self.button.is_pressed() {
                held += 1;
            } else {
                if held >= HOLD_POLLS {
                    self.power.toggle().await;
                }
                held = 0;
            }
        }
    }
}
