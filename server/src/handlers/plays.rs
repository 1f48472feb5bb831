use std::io::Cursor;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use image::{ImageFormat, ImageReader};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::StaffUser;
use crate::models::{PlayDetail, PlayFilter, PlayImage, PlayInput, PlayListItem, PlaySummary};
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::AppError;

/// Uploaded play images live under `MEDIA_ROOT/<PLAY_IMAGE_DIR>`.
const PLAY_IMAGE_DIR: &str = "upload/plays";
const IMAGE_FIELD: &str = "image";
const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// `?genres=1,2&actors=3`
#[derive(Debug, Default, Deserialize)]
pub struct PlayQuery {
    pub genres: Option<String>,
    pub actors: Option<String>,
}

pub async fn list_plays(
    State(state): State<AppState>,
    Query(query): Query<PlayQuery>,
) -> Result<Response, AppError> {
    let filter = PlayFilter::from_query(query.genres.as_deref(), query.actors.as_deref())?;
    debug!(?filter, "Listing plays");

    let plays: Vec<PlayListItem> = state
        .store
        .list_plays(&filter)
        .await?
        .iter()
        .map(PlayListItem::from)
        .collect();
    Ok(success(plays, "Plays retrieved").into_response())
}

pub async fn get_play(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let play = PlayDetail::from(state.store.get_play(id).await?);
    Ok(success(play, "Play retrieved").into_response())
}

pub async fn create_play(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<PlayInput>,
) -> Result<Response, AppError> {
    let record = state.store.create_play(&input.normalized()?).await?;
    info!(play_id = record.play.id, "Play created");
    Ok(created(PlaySummary::from(&record), "Play created").into_response())
}

pub async fn update_play(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<PlayInput>,
) -> Result<Response, AppError> {
    let record = state.store.update_play(id, &input.normalized()?).await?;
    Ok(success(PlaySummary::from(&record), "Play updated").into_response())
}

pub async fn delete_play(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.store.delete_play(id).await?;
    info!(play_id = id, "Play deleted");
    Ok(empty_success("Play deleted").into_response())
}

/// Stores the multipart `image` field and records its path on the play.
///
/// The bytes must decode as an image; the stored extension comes from the
/// detected format, not from the client's filename or content type. The
/// play's previous image file is removed once the new path is recorded.
pub async fn upload_image(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let record = state.store.get_play(id).await?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::ValidationError(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::ValidationError(format!("Failed to read upload: {e}")))?;
        upload = Some(bytes);
        break;
    }

    let Some(bytes) = upload else {
        return Err(AppError::ValidationError(
            "No file was submitted in the 'image' field.".to_string(),
        ));
    };
    if bytes.is_empty() {
        return Err(AppError::ValidationError("The submitted file is empty.".to_string()));
    }

    let format = detect_image(bytes.clone()).await?;
    let extension = format.extensions_str().first().copied().unwrap_or("img");

    let file_name = format!(
        "{}-{}.{}",
        slugify(&record.play.title),
        Uuid::new_v4(),
        extension
    );
    let relative = format!("{PLAY_IMAGE_DIR}/{file_name}");
    let directory = state.media_root.join(PLAY_IMAGE_DIR);

    tokio::fs::create_dir_all(&directory)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to create media directory: {e}")))?;
    tokio::fs::write(directory.join(&file_name), &bytes)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to store image: {e}")))?;

    let play = match state.store.set_play_image(id, &relative).await {
        Ok(play) => play,
        Err(err) => {
            remove_media_file(&state, &relative).await;
            return Err(err.into());
        }
    };
    info!(play_id = id, path = %relative, ?format, size = bytes.len(), "Play image uploaded");

    if let Some(previous) = record.play.image.as_deref() {
        if previous != relative {
            remove_media_file(&state, previous).await;
        }
    }

    let payload = PlayImage {
        id: play.id,
        image: play.image,
    };
    Ok(success(payload, "Image uploaded").into_response())
}

/// Decodes the upload off the async runtime and returns its format.
async fn detect_image(bytes: Bytes) -> Result<ImageFormat, AppError> {
    let decoded = tokio::task::spawn_blocking(move || -> Option<ImageFormat> {
        let reader = ImageReader::new(Cursor::new(bytes.as_ref()))
            .with_guessed_format()
            .ok()?;
        let format = reader.format()?;
        reader.decode().ok()?;
        Some(format)
    })
    .await
    .map_err(|e| AppError::InternalServerError(format!("Image check failed: {e}")))?;

    decoded.ok_or_else(|| AppError::ValidationError(INVALID_IMAGE.to_string()))
}

/// Deletes a stored play image; failures are logged and otherwise ignored.
async fn remove_media_file(state: &AppState, relative: &str) {
    let name = relative
        .strip_prefix(PLAY_IMAGE_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|name| !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\']));
    let Some(name) = name else {
        warn!(path = %relative, "Refusing to remove file outside the play image directory");
        return;
    };

    let path = state.media_root.join(PLAY_IMAGE_DIR).join(name);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove play image");
    }
}

/// Lowercase ASCII alphanumerics separated by single hyphens.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("play");
    }
    slug
}
