use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::auth::StaffUser;
use crate::models::ActorInput;
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::AppError;

pub async fn list_actors(State(state): State<AppState>) -> Result<Response, AppError> {
    let actors = state.store.list_actors().await?;
    Ok(success(actors, "Actors retrieved").into_response())
}

pub async fn get_actor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let actor = state.store.get_actor(id).await?;
    Ok(success(actor, "Actor retrieved").into_response())
}

pub async fn create_actor(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<ActorInput>,
) -> Result<Response, AppError> {
    let actor = state.store.create_actor(&input.normalized()?).await?;
    info!(actor_id = actor.id, "Actor created");
    Ok(created(actor, "Actor created").into_response())
}

pub async fn update_actor(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<ActorInput>,
) -> Result<Response, AppError> {
    let actor = state.store.update_actor(id, &input.normalized()?).await?;
    Ok(success(actor, "Actor updated").into_response())
}

pub async fn delete_actor(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.store.delete_actor(id).await?;
    info!(actor_id = id, "Actor deleted");
    Ok(empty_success("Actor deleted").into_response())
}
