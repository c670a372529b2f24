// src/scheduler.rs - Daily wake/sleep schedule evaluation
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tokio::sync::broadcast;

use crate::config::parse_clock_time;
use crate::power::PowerControl;
use crate::state::SharedState;

/// How often the schedule settings are re-read and due triggers run.
const SCHED_POLL: Duration = Duration::from_secs(5);

/// Wall-clock source, a seam so tests can drive the schedule through a fake.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerAction {
    Wake,
    Sleep,
}

/// Fires once per calendar day at a fixed time. A trigger registered after
/// its time has already passed is primed as fired for that day.
#[derive(Debug)]
struct DailyTrigger {
    at: NaiveTime,
    action: PowerAction,
    last_fired: Option<NaiveDate>,
}

impl DailyTrigger {
    fn new(at: NaiveTime, action: PowerAction, now: NaiveDateTime) -> Self {
        let last_fired = if at <= now.time() {
            Some(now.date())
        } else {
            None
        };
        Self {
            at,
            action,
            last_fired,
        }
    }

    fn due(&self, now: NaiveDateTime) -> bool {
        self.last_fired != Some(now.date()) && now.time() >= self.at
    }
}

fn fractional_hours(time: NaiveTime) -> f64 {
    f64::from(time.hour()) + f64::from(time.minute()) / 60.0
}

pub struct Scheduler {
    state: SharedState,
    power: PowerControl,
    clock: Box<dyn Clock>,
    triggers: Vec<DailyTrigger>,
    last_wake: String,
    last_sleep: String,
    last_enabled: bool,
}

impl Scheduler {
    pub fn new(state: SharedState, power: PowerControl, clock: Box<dyn Clock>) -> Self {
        Self {
            state,
            power,
            clock,
            triggers: Vec::new(),
            // Empty sentinels so the first tick always registers.
            last_wake: String::new(),
            last_sleep: String::new(),
            last_enabled: false,
        }
    }

    pub(crate) async fn run_tick(&mut self) {
        let wake = self.state.wake_time().await;
        let sleep = self.state.sleep_time().await;
        let enabled = self.state.sched_enabled().await;
        let now = self.clock.now();

        if wake != self.last_wake || sleep != self.last_sleep || enabled != self.last_enabled {
            self.triggers.clear();
            if enabled {
                match (parse_clock_time(&wake), parse_clock_time(&sleep)) {
                    (Ok(wake_at), Ok(sleep_at)) => {
                        self.triggers
                            .push(DailyTrigger::new(wake_at, PowerAction::Wake, now));
                        self.triggers
                            .push(DailyTrigger::new(sleep_at, PowerAction::Sleep, now));

                        // Apply the correct state right away instead of
                        // waiting for the next boundary. The window test
                        // assumes wake <= now < sleep within one calendar
                        // day; a window crossing midnight resolves to
                        // asleep for the wrapped segment.
                        let now_h = fractional_hours(now.time());
                        if fractional_hours(wake_at) <= now_h && now_h < fractional_hours(sleep_at)
                        {
                            self.power.wakeup().await;
                        } else {
                            self.power.gotosleep().await;
                        }
                        tracing::info!("schedule armed: wake {} sleep {}", wake, sleep);
                    }
                    _ => {
                        tracing::warn!("ignoring unparseable schedule times {:?}/{:?}", wake, sleep)
                    }
                }
            } else {
                tracing::info!("schedule disabled");
            }
            self.last_wake = wake;
            self.last_sleep = sleep;
            self.last_enabled = enabled;
        }

        for trigger in &mut self.triggers {
            if trigger.due(now) {
                trigger.last_fired = Some(now.date());
                match trigger.action {
                    PowerAction::Wake => self.power.wakeup().await,
                    PowerAction::Sleep => self.power.gotosleep().await,
                }
            }
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            self.run_tick().await;
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(SCHED_POLL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hardware::sim::RecordingOutput;
    use crate::hardware::shared_output;
    use crate::state::ControlState;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct FakeClock {
        now: Arc<Mutex<NaiveDateTime>>,
    }

    impl FakeClock {
        fn at(hh: u32, mm: u32) -> Self {
            Self {
                now: Arc::new(Mutex::new(datetime(hh, mm))),
            }
        }

        fn set(&self, hh: u32, mm: u32) {
            *self.now.lock().unwrap() = datetime(hh, mm);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }
    }

    fn datetime(hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 6)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    fn fixture(clock: FakeClock) -> (Scheduler, SharedState) {
        let state = SharedState::new(ControlState::from_config(&Config::default()));
        let (heater, _) = RecordingOutput::new();
        let (indicator, _) = RecordingOutput::new();
        let power =
            PowerControl::new(state.clone(), shared_output(heater), shared_output(indicator));
        let scheduler = Scheduler::new(state.clone(), power, Box::new(clock));
        (scheduler, state)
    }

    // Default schedule window is 06:30..08:30.

    #[tokio::test]
    async fn enabling_inside_the_window_wakes_immediately() {
        let clock = FakeClock::at(7, 0);
        let (mut scheduler, state) = fixture(clock);
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;
        assert!(state.is_awake().await);
    }

    #[tokio::test]
    async fn enabling_outside_the_window_sleeps_immediately() {
        let clock = FakeClock::at(12, 0);
        let (mut scheduler, state) = fixture(clock);
        state.set_awake(true).await;
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;
        assert!(!state.is_awake().await);
    }

    #[tokio::test]
    async fn window_is_half_open() {
        let clock = FakeClock::at(6, 30);
        let (mut scheduler, state) = fixture(clock.clone());
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;
        assert!(state.is_awake().await, "wake boundary is inclusive");

        state.set_sleep_time("07:00".to_string()).await;
        clock.set(7, 0);
        scheduler.run_tick().await;
        assert!(!state.is_awake().await, "sleep boundary is exclusive");
    }

    #[tokio::test]
    async fn trigger_fires_when_the_clock_crosses_it() {
        let clock = FakeClock::at(5, 0);
        let (mut scheduler, state) = fixture(clock.clone());
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;
        assert!(!state.is_awake().await);

        clock.set(6, 30);
        scheduler.run_tick().await;
        assert!(state.is_awake().await);
    }

    #[tokio::test]
    async fn trigger_fires_at_most_once_per_day() {
        let clock = FakeClock::at(5, 0);
        let (mut scheduler, state) = fixture(clock.clone());
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;

        clock.set(6, 31);
        scheduler.run_tick().await;
        assert!(state.is_awake().await);

        // Someone turns the machine off by hand; the already-fired trigger
        // must not wake it again.
        state.set_awake(false).await;
        clock.set(6, 40);
        scheduler.run_tick().await;
        assert!(!state.is_awake().await);
    }

    #[tokio::test]
    async fn past_triggers_are_primed_at_registration() {
        let clock = FakeClock::at(9, 0);
        let (mut scheduler, state) = fixture(clock.clone());
        state.set_awake(true).await;
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;
        assert!(!state.is_awake().await, "outside the window at registration");

        // Neither trigger fires later the same day.
        state.set_awake(true).await;
        clock.set(9, 5);
        scheduler.run_tick().await;
        assert!(state.is_awake().await);
    }

    #[tokio::test]
    async fn reconfiguration_reevaluates_the_window() {
        let clock = FakeClock::at(9, 0);
        let (mut scheduler, state) = fixture(clock);
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;
        assert!(!state.is_awake().await);

        state.set_sleep_time("10:00".to_string()).await;
        scheduler.run_tick().await;
        assert!(state.is_awake().await, "new window covers 09:00");
    }

    #[tokio::test]
    async fn disabling_clears_triggers() {
        let clock = FakeClock::at(5, 0);
        let (mut scheduler, state) = fixture(clock.clone());
        state.set_sched_enabled(true).await;
        scheduler.run_tick().await;

        state.set_sched_enabled(false).await;
        scheduler.run_tick().await;

        clock.set(6, 30);
        scheduler.run_tick().await;
        assert!(!state.is_awake().await, "no trigger left to fire");
    }
}
