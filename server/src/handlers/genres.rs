use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::auth::StaffUser;
use crate::models::GenreInput;
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::AppError;

pub async fn list_genres(State(state): State<AppState>) -> Result<Response, AppError> {
    let genres = state.store.list_genres().await?;
    Ok(success(genres, "Genres retrieved").into_response())
}

pub async fn get_genre(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let genre = state.store.get_genre(id).await?;
    Ok(success(genre, "Genre retrieved").into_response())
}

pub async fn create_genre(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<GenreInput>,
) -> Result<Response, AppError> {
    let genre = state.store.create_genre(&input.normalized()?).await?;
    info!(genre_id = genre.id, "Genre created");
    Ok(created(genre, "Genre created").into_response())
}

pub async fn update_genre(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<GenreInput>,
) -> Result<Response, AppError> {
    let genre = state.store.update_genre(id, &input.normalized()?).await?;
    Ok(success(genre, "Genre updated").into_response())
}

pub async fn delete_genre(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.store.delete_genre(id).await?;
    info!(genre_id = id, "Genre deleted");
    Ok(empty_success("Genre deleted").into_response())
}
