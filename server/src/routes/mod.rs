use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{
    actors, genres, halls, health_check, performances, plays, reservations, users,
};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let media = ServeDir::new(state.media_root.as_path());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/user", user_routes())
        .nest("/api/theatre", theatre_routes(state.max_upload_bytes))
        .nest_service("/media", media)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer())
        .layer(create_cors_layer())
        .with_state(state)
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(users::register))
        .route(
            "/token",
            post(users::obtain_token).delete(users::revoke_token),
        )
        .route("/me", get(users::me).put(users::update_me))
}

fn theatre_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/genres", get(genres::list_genres).post(genres::create_genre))
        .route(
            "/genres/:id",
            get(genres::get_genre)
                .put(genres::update_genre)
                .delete(genres::delete_genre),
        )
        .route("/actors", get(actors::list_actors).post(actors::create_actor))
        .route(
            "/actors/:id",
            get(actors::get_actor)
                .put(actors::update_actor)
                .delete(actors::delete_actor),
        )
        .route("/plays", get(plays::list_plays).post(plays::create_play))
        .route(
            "/plays/:id",
            get(plays::get_play)
                .put(plays::update_play)
                .delete(plays::delete_play),
        )
        .route(
            "/plays/:id/upload-image",
            post(plays::upload_image).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/theatre-halls",
            get(halls::list_halls).post(halls::create_hall),
        )
        .route(
            "/theatre-halls/:id",
            get(halls::get_hall)
                .put(halls::update_hall)
                .delete(halls::delete_hall),
        )
        .route(
            "/performances",
            get(performances::list_performances).post(performances::create_performance),
        )
        .route(
            "/performances/:id",
            get(performances::get_performance)
                .put(performances::update_performance)
                .delete(performances::delete_performance),
        )
        .route(
            "/reservations",
            get(reservations::list_reservations).post(reservations::create_reservation),
        )
        .route(
            "/reservations/:id",
            get(reservations::get_reservation).delete(reservations::delete_reservation),
        )
}
