// src/actuator.rs - Time-proportioning heater actuation
use std::time::Duration;

use tokio::sync::broadcast;

use crate::hardware::SharedOutput;
use crate::state::SharedState;

/// Length of one actuation period.
const PERIOD: Duration = Duration::from_secs(1);

/// Realizes the smoothed PID output as binary heater action: each period the
/// relay is ON for `avgpid / boundary` of the period and OFF for the rest.
pub struct HeaterLoop {
    state: SharedState,
    heater: SharedOutput,
    boundary: f64,
}

impl HeaterLoop {
    pub fn new(state: SharedState, heater: SharedOutput, boundary: f64) -> Self {
        Self {
            state,
            heater,
            boundary,
        }
    }

    /// One actuation period. Consumes a full period when asleep or at zero
    /// duty, `|duty|` of a period for a negative output, so the cadence stays
    /// regular whatever the sign of the control signal.
    pub(crate) async fn run_period(&self) {
        if !self.state.is_awake().await {
            self.heater.lock().await.set_on(false);
            tokio::time::sleep(PERIOD).await;
            return;
        }

        let avgpid = self.state.avgpid().await;
        let duty = (avgpid / self.boundary).clamp(-1.0, 1.0);
        if duty > 0.0 {
            self.state.set_heating(true).await;
            self.heater.lock().await.set_on(true);
            tokio::time::sleep(PERIOD.mul_f64(duty)).await;
            self.heater.lock().await.set_on(false);
            tokio::time::sleep(PERIOD.mul_f64(1.0 - duty)).await;
        } else {
            self.state.set_heating(false).await;
            self.heater.lock().await.set_on(false);
            let idle = if duty == 0.0 { PERIOD } else { PERIOD.mul_f64(-duty) };
            tokio::time::sleep(idle).await;
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.run_period() => {}
            }
        }
        // Whatever point the cycle was interrupted at, leave the relay open.
        self.heater.lock().await.set_on(false);
        tracing::info!("heater loop shutting down, heater off");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hardware::sim::{OutputLog, RecordingOutput};
    use crate::hardware::shared_output;
    use crate::state::ControlState;
    use tokio::time::Instant;

    const BOUNDARY: f64 = 100.0;

    fn fixture() -> (HeaterLoop, SharedState, OutputLog) {
        let state = SharedState::new(ControlState::from_config(&Config::default()));
        let (heater, log) = RecordingOutput::new();
        let heater_loop = HeaterLoop::new(state.clone(), shared_output(heater), BOUNDARY);
        (heater_loop, state, log)
    }

    #[tokio::test(start_paused = true)]
    async fn full_positive_duty_heats_the_whole_period() {
        let (heater_loop, state, log) = fixture();
        state.set_awake(true).await;
        state.set_avgpid(BOUNDARY).await;

        let start = Instant::now();
        heater_loop.run_period().await;

        assert_eq!(start.elapsed(), PERIOD);
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].1, "heater should switch on at period start");
        assert_eq!(events[0].0, start);
        assert!(!events[1].1, "heater should switch off at period end");
        assert_eq!(events[1].0, start + PERIOD);
        assert!(state.heating().await);
    }

    #[tokio::test(start_paused = true)]
    async fn half_duty_splits_the_period() {
        let (heater_loop, state, log) = fixture();
        state.set_awake(true).await;
        state.set_avgpid(BOUNDARY / 2.0).await;

        let start = Instant::now();
        heater_loop.run_period().await;

        assert_eq!(start.elapsed(), PERIOD);
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].1);
        assert!(!events[1].1);
        assert_eq!(events[1].0 - events[0].0, PERIOD / 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duty_stays_off_for_a_full_period() {
        let (heater_loop, state, log) = fixture();
        state.set_awake(true).await;
        state.set_avgpid(0.0).await;

        let start = Instant::now();
        heater_loop.run_period().await;

        assert_eq!(start.elapsed(), PERIOD);
        assert!(log.events().iter().all(|&(_, on)| !on));
        assert!(!state.heating().await);
    }

    #[tokio::test(start_paused = true)]
    async fn full_negative_duty_consumes_the_whole_period_off() {
        let (heater_loop, state, log) = fixture();
        state.set_awake(true).await;
        state.set_avgpid(-BOUNDARY).await;

        let start = Instant::now();
        heater_loop.run_period().await;

        assert_eq!(start.elapsed(), PERIOD);
        assert!(log.events().iter().all(|&(_, on)| !on));
        assert!(!state.heating().await);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_negative_duty_consumes_its_share() {
        let (heater_loop, state, _) = fixture();
        state.set_awake(true).await;
        state.set_avgpid(-BOUNDARY / 4.0).await;

        let start = Instant::now();
        heater_loop.run_period().await;
        assert_eq!(start.elapsed(), PERIOD / 4);
    }

    #[tokio::test(start_paused = true)]
    async fn asleep_forces_heater_off_and_idles() {
        let (heater_loop, state, log) = fixture();
        state.set_avgpid(BOUNDARY).await;

        let start = Instant::now();
        heater_loop.run_period().await;

        assert_eq!(start.elapsed(), PERIOD);
        assert!(!log.is_on());
        assert!(log.events().iter().all(|&(_, on)| !on));
    }
}
