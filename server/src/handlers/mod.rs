use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::utils::response::success;

pub mod actors;
pub mod genres;
pub mod halls;
pub mod performances;
pub mod plays;
pub mod reservations;
pub mod users;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "theatre-api",
    };

    success(payload, "Health check successful").into_response()
}
