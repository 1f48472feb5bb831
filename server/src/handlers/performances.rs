use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::auth::StaffUser;
use crate::models::{
    PerformanceDetail, PerformanceFilter, PerformanceInput, PerformanceListItem, PlayDetail,
};
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct PerformanceQuery {
    /// Case-insensitive substring of the play title.
    pub play: Option<String>,
}

pub async fn list_performances(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Response, AppError> {
    let filter = PerformanceFilter::by_play_title(query.play.as_deref());
    let performances = state
        .store
        .list_performances(&filter)
        .await?
        .into_iter()
        .map(PerformanceListItem::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(success(performances, "Performances retrieved").into_response())
}

pub async fn get_performance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let performance = state.store.get_performance(id).await?;
    let play = state.store.get_play(performance.play_id).await?;
    let theatre_hall = state.store.get_hall(performance.theatre_hall_id).await?;
    let taken_seats = state.store.taken_seats(id).await?;

    let detail = PerformanceDetail {
        id: performance.id,
        play: PlayDetail::from(play),
        theatre_hall,
        show_time: performance.show_time,
        taken_seats,
    };
    Ok(success(detail, "Performance retrieved").into_response())
}

pub async fn create_performance(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<PerformanceInput>,
) -> Result<Response, AppError> {
    let performance = state.store.create_performance(&input).await?;
    info!(
        performance_id = performance.id,
        play_id = performance.play_id,
        hall_id = performance.theatre_hall_id,
        "Performance scheduled"
    );
    Ok(created(performance, "Performance created").into_response())
}

pub async fn update_performance(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<PerformanceInput>,
) -> Result<Response, AppError> {
    let performance = state.store.update_performance(id, &input).await?;
    Ok(success(performance, "Performance updated").into_response())
}

/// Also removes every ticket sold for the performance.
pub async fn delete_performance(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.store.delete_performance(id).await?;
    info!(performance_id = id, "Performance deleted");
    Ok(empty_success("Performance deleted").into_response())
}
