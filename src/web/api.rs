//! Defines the Axum routes and handlers for the machine's control surface.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};

use crate::config::{parse_clock_time, BREWTEMP_MAX, BREWTEMP_MIN};
use crate::hardware::SystemControl;
use crate::power::PowerControl;
use crate::state::SharedState;
use crate::web::models::{AwakeResponse, BrewTempForm, SchedulerForm, SleepForm, WakeForm};

/// Delay after toggling the schedule switch, giving the scheduler's next
/// poll a head start before the client re-reads state.
const SCHEDULER_SETTLE: Duration = Duration::from_millis(250);

pub struct AppStateInner {
    pub state: SharedState,
    pub power: PowerControl,
    pub system: Arc<dyn SystemControl>,
}

pub type AppState = Arc<AppStateInner>;

pub fn app_state(
    state: SharedState,
    power: PowerControl,
    system: Arc<dyn SystemControl>,
) -> AppState {
    Arc::new(AppStateInner {
        state,
        power,
        system,
    })
}

/// Helper to create a JSON error response with a message and status code.
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Creates the Axum router with all the control endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/brewtemp", post(set_brewtemp))
        .route("/is_awake", get(get_is_awake))
        .route("/allstats", get(get_allstats))
        .route("/setwake", post(set_wake))
        .route("/setsleep", post(set_sleep))
        .route("/scheduler", post(set_scheduler))
        .route("/turnon", get(turn_on))
        .route("/turnoff", get(turn_off))
        .route("/restart", get(restart))
        .route("/shutdown", get(shutdown))
        .route("/healthcheck", get(healthcheck))
        .with_state(state)
}

/// Handler to update the brew setpoint. Out-of-range values leave the state
/// untouched.
async fn set_brewtemp(
    State(app): State<AppState>,
    Form(form): Form<BrewTempForm>,
) -> axum::response::Response {
    if (i64::from(BREWTEMP_MIN)..=i64::from(BREWTEMP_MAX)).contains(&form.settemp) {
        app.state.set_brewtemp(form.settemp as u32).await;
        (StatusCode::OK, form.settemp.to_string()).into_response()
    } else {
        json_error(
            "Temperature out of accepted range: 80 - 120 °C!",
            StatusCode::BAD_REQUEST,
        )
    }
}

async fn get_is_awake(State(app): State<AppState>) -> Json<AwakeResponse> {
    Json(AwakeResponse {
        awake: app.state.is_awake().await,
    })
}

async fn get_allstats(State(app): State<AppState>) -> axum::response::Response {
    Json(app.state.snapshot().await).into_response()
}

async fn set_wake(
    State(app): State<AppState>,
    Form(form): Form<WakeForm>,
) -> axum::response::Response {
    if parse_clock_time(&form.wake).is_err() {
        return json_error("Invalid time format.", StatusCode::BAD_REQUEST);
    }
    app.state.set_wake_time(form.wake.clone()).await;
    (StatusCode::OK, form.wake).into_response()
}

async fn set_sleep(
    State(app): State<AppState>,
    Form(form): Form<SleepForm>,
) -> axum::response::Response {
    if parse_clock_time(&form.sleep).is_err() {
        return json_error("Invalid time format.", StatusCode::BAD_REQUEST);
    }
    app.state.set_sleep_time(form.sleep.clone()).await;
    (StatusCode::OK, form.sleep).into_response()
}

/// "True" enables the schedule, anything else disables it.
async fn set_scheduler(
    State(app): State<AppState>,
    Form(form): Form<SchedulerForm>,
) -> axum::response::Response {
    app.state.set_sched_enabled(form.scheduler == "True").await;
    tokio::time::sleep(SCHEDULER_SETTLE).await;
    (StatusCode::OK, form.scheduler).into_response()
}

async fn turn_on(State(app): State<AppState>) -> &'static str {
    app.power.wakeup().await;
    "On"
}

async fn turn_off(State(app): State<AppState>) -> &'static str {
    app.power.gotosleep().await;
    "Off"
}

async fn restart(State(app): State<AppState>) -> &'static str {
    app.system.reboot();
    "Rebooting..."
}

async fn shutdown(State(app): State<AppState>) -> &'static str {
    app.system.shutdown();
    "Shutting down..."
}

async fn healthcheck() -> &'static str {
    "OK"
}
