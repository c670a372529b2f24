//! Integration tests for the HTTP control surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt; // for .collect().await
use tower::util::ServiceExt; // for `oneshot`

use silvia_rs::config::Config;
use silvia_rs::hardware::shared_output;
use silvia_rs::hardware::sim::{OutputLog, RecordingOutput, RecordingSystemControl};
use silvia_rs::power::PowerControl;
use silvia_rs::state::{ControlState, SharedState};
use silvia_rs::web::api::{app_state, create_router};

struct Fixture {
    app: axum::Router,
    state: SharedState,
    system: RecordingSystemControl,
    heater_log: OutputLog,
}

fn fixture() -> Fixture {
    let config = Config::default();
    let state = SharedState::new(ControlState::from_config(&config));
    let (heater, heater_log) = RecordingOutput::new();
    let (indicator, _) = RecordingOutput::new();
    let power = PowerControl::new(state.clone(), shared_output(heater), shared_output(indicator));
    let system = RecordingSystemControl::new();
    let app = create_router(app_state(state.clone(), power, Arc::new(system.clone())));
    Fixture {
        app,
        state,
        system,
        heater_log,
    }
}

fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn brewtemp_accepts_the_whole_range() {
    for settemp in [80u32, 95, 120] {
        let fx = fixture();
        let response = fx
            .app
            .oneshot(form_post("/brewtemp", &format!("settemp={settemp}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, settemp.to_string());
        assert_eq!(fx.state.brewtemp().await, settemp);
    }
}

#[tokio::test]
async fn brewtemp_rejects_out_of_range_and_keeps_state() {
    for settemp in [79i64, 121, -5] {
        let fx = fixture();
        let before = fx.state.brewtemp().await;
        let response = fx
            .app
            .oneshot(form_post("/brewtemp", &format!("settemp={settemp}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(fx.state.brewtemp().await, before);
    }
}

#[tokio::test]
async fn is_awake_reflects_shared_state() {
    let fx = fixture();
    fx.state.set_awake(true).await;
    let response = fx.app.oneshot(get("/is_awake")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["awake"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn allstats_returns_the_full_snapshot() {
    let fx = fixture();
    let response = fx.app.oneshot(get("/allstats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    for key in [
        "is_awake", "heating", "sched_enabled", "sleep_time", "wake_time", "brewtemp", "i",
        "temp", "avgtemp", "pidval", "avgpid", "pterm", "iterm", "dterm",
    ] {
        assert!(json.get(key).is_some(), "missing field {key}");
    }
}

#[tokio::test]
async fn setwake_validates_the_time_format() {
    let fx = fixture();
    let response = fx
        .app
        .clone()
        .oneshot(form_post("/setwake", "wake=07:15"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "07:15");
    assert_eq!(fx.state.wake_time().await, "07:15");

    let before = fx.state.wake_time().await;
    for bad in ["25:00", "7am", "0715"] {
        let response = fx
            .app
            .clone()
            .oneshot(form_post("/setwake", &format!("wake={bad}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{bad} accepted");
        assert_eq!(fx.state.wake_time().await, before);
    }
}

#[tokio::test]
async fn setsleep_validates_the_time_format() {
    let fx = fixture();
    let response = fx
        .app
        .clone()
        .oneshot(form_post("/setsleep", "sleep=22:45"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fx.state.sleep_time().await, "22:45");

    let response = fx
        .app
        .oneshot(form_post("/setsleep", "sleep=midnight"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fx.state.sleep_time().await, "22:45");
}

#[tokio::test(start_paused = true)]
async fn scheduler_switch_follows_the_form_value() {
    let fx = fixture();
    let response = fx
        .app
        .clone()
        .oneshot(form_post("/scheduler", "scheduler=True"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fx.state.sched_enabled().await);

    let response = fx
        .app
        .oneshot(form_post("/scheduler", "scheduler=False"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!fx.state.sched_enabled().await);
}

#[tokio::test]
async fn turnon_and_turnoff_drive_the_power_state() {
    let fx = fixture();

    let response = fx.app.clone().oneshot(get("/turnon")).await.unwrap();
    assert_eq!(body_string(response).await, "On");
    assert!(fx.state.is_awake().await);

    // Applying the same transition twice lands in the same state.
    let _ = fx.app.clone().oneshot(get("/turnon")).await.unwrap();
    assert!(fx.state.is_awake().await);

    let response = fx.app.clone().oneshot(get("/turnoff")).await.unwrap();
    assert_eq!(body_string(response).await, "Off");
    assert!(!fx.state.is_awake().await);
    assert!(!fx.heater_log.is_on());

    let _ = fx.app.oneshot(get("/turnoff")).await.unwrap();
    assert!(!fx.state.is_awake().await);
}

#[tokio::test]
async fn restart_and_shutdown_reach_system_control() {
    let fx = fixture();
    let response = fx.app.clone().oneshot(get("/restart")).await.unwrap();
    assert_eq!(body_string(response).await, "Rebooting...");
    assert_eq!(fx.system.reboots(), 1);

    let response = fx.app.oneshot(get("/shutdown")).await.unwrap();
    assert_eq!(body_string(response).await, "Shutting down...");
    assert_eq!(fx.system.shutdowns(), 1);
}

#[tokio::test]
async fn healthcheck_answers_ok() {
    let fx = fixture();
    let response = fx.app.oneshot(get("/healthcheck")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
}
