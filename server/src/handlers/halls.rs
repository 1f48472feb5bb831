use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::auth::StaffUser;
use crate::models::TheatreHallInput;
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::AppError;

pub async fn list_halls(State(state): State<AppState>) -> Result<Response, AppError> {
    let halls = state.store.list_halls().await?;
    Ok(success(halls, "Theatre halls retrieved").into_response())
}

pub async fn get_hall(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let hall = state.store.get_hall(id).await?;
    Ok(success(hall, "Theatre hall retrieved").into_response())
}

pub async fn create_hall(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<TheatreHallInput>,
) -> Result<Response, AppError> {
    let hall = state.store.create_hall(&input.normalized()?).await?;
    info!(hall_id = hall.id, capacity = hall.capacity(), "Theatre hall created");
    Ok(created(hall, "Theatre hall created").into_response())
}

pub async fn update_hall(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<TheatreHallInput>,
) -> Result<Response, AppError> {
    let hall = state.store.update_hall(id, &input.normalized()?).await?;
    Ok(success(hall, "Theatre hall updated").into_response())
}

/// Also removes the hall's performances and their tickets.
pub async fn delete_hall(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.store.delete_hall(id).await?;
    info!(hall_id = id, "Theatre hall deleted");
    Ok(empty_success("Theatre hall deleted").into_response())
}
