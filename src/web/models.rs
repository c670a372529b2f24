//! Request and response models for the HTTP control surface.

use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct BrewTempForm {
    pub settemp: i64,
}

#[derive(Deserialize)]
pub struct WakeForm {
    pub wake: String,
}

#[derive(Deserialize)]
pub struct SleepForm {
    pub sleep: String,
}

#[derive(Deserialize)]
pub struct SchedulerForm {
    pub scheduler: String,
}

#[derive(Serialize)]
pub struct AwakeResponse {
    pub awake: bool,
}
