use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use theatre_server::auth::{ensure_staff, issue_token, register};
use theatre_server::config::Config;
use theatre_server::models::user::Credentials;
use theatre_server::routes::create_routes;
use theatre_server::state::AppState;
use theatre_server::store::InMemoryStore;

struct TestApp {
    router: Router,
    media_root: PathBuf,
    staff_token: String,
    user_token: String,
}

fn credentials(email: &str, password: &str) -> Credentials {
    Credentials {
        email: email.to_string(),
        password: password.to_string(),
    }
}

async fn spawn_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());

    ensure_staff(store.as_ref(), "admin@theatre.test", "adminpass")
        .await
        .unwrap();
    let ttl = chrono::Duration::hours(1);
    let staff_token = issue_token(
        store.as_ref(),
        &credentials("admin@theatre.test", "adminpass"),
        ttl,
    )
    .await
    .unwrap();

    register(store.as_ref(), &credentials("viewer@theatre.test", "viewerpass"))
        .await
        .unwrap();
    let user_token = issue_token(
        store.as_ref(),
        &credentials("viewer@theatre.test", "viewerpass"),
        ttl,
    )
    .await
    .unwrap();

    let config = Config {
        media_root: std::env::temp_dir().join(format!("theatre-media-{}", uuid::Uuid::new_v4())),
        ..Config::default()
    };

    TestApp {
        router: create_routes(AppState::new(store, &config)),
        media_root: config.media_root.clone(),
        staff_token,
        user_token,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn staff_post(&self, uri: &str, body: Value) -> Value {
        let (status, body) = self
            .send(Method::POST, uri, Some(&self.staff_token), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "POST {uri} failed: {body}");
        body["data"].clone()
    }

    async fn reserve(&self, tickets: Value) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            "/api/theatre/reservations",
            Some(&self.user_token),
            Some(json!({ "tickets": tickets })),
        )
        .await
    }

    /// A 10x10 hall with one performance of "Hamlet"; returns the performance id.
    async fn seed_performance(&self) -> i64 {
        let genre = self
            .staff_post("/api/theatre/genres", json!({ "name": "Drama" }))
            .await;
        let actor = self
            .staff_post(
                "/api/theatre/actors",
                json!({ "first_name": "Ian", "last_name": "McKellen" }),
            )
            .await;
        let play = self
            .staff_post(
                "/api/theatre/plays",
                json!({
                    "title": "Hamlet",
                    "description": "Prince of Denmark",
                    "genres": [genre["id"]],
                    "actors": [actor["id"]],
                }),
            )
            .await;
        let hall = self
            .staff_post(
                "/api/theatre/theatre-halls",
                json!({ "name": "Main", "rows": 10, "seats_in_row": 10 }),
            )
            .await;
        let performance = self
            .staff_post(
                "/api/theatre/performances",
                json!({
                    "play": play["id"],
                    "theatre_hall": hall["id"],
                    "show_time": "2030-05-01T19:00:00Z",
                }),
            )
            .await;
        performance["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app().await;
    let (status, body) = app.send(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "theatre-api");
}

#[tokio::test]
async fn catalog_writes_require_staff() {
    let app = spawn_app().await;
    let genre = json!({ "name": "Comedy" });

    let (status, body) = app
        .send(Method::POST, "/api/theatre/genres", None, Some(genre.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_ERROR");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/theatre/genres",
            Some(&app.user_token),
            Some(genre),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = app.send(Method::GET, "/api/theatre/genres", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn duplicate_genre_name_conflicts() {
    let app = spawn_app().await;
    app.staff_post("/api/theatre/genres", json!({ "name": "Drama" }))
        .await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/theatre/genres",
            Some(&app.staff_token),
            Some(json!({ "name": "Drama" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE");
    assert!(body["error"]["details"]["name"].is_array());
}

#[tokio::test]
async fn play_with_unknown_genre_is_rejected() {
    let app = spawn_app().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/theatre/plays",
            Some(&app.staff_token),
            Some(json!({ "title": "Macbeth", "description": "", "genres": [999] })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REFERENCE");
}

#[tokio::test]
async fn play_filters_combine_fields() {
    let app = spawn_app().await;
    let drama = app
        .staff_post("/api/theatre/genres", json!({ "name": "Drama" }))
        .await;
    let comedy = app
        .staff_post("/api/theatre/genres", json!({ "name": "Comedy" }))
        .await;
    let actor = app
        .staff_post(
            "/api/theatre/actors",
            json!({ "first_name": "Judi", "last_name": "Dench" }),
        )
        .await;

    app.staff_post(
        "/api/theatre/plays",
        json!({ "title": "Hamlet", "description": "", "genres": [drama["id"]], "actors": [actor["id"]] }),
    )
    .await;
    app.staff_post(
        "/api/theatre/plays",
        json!({ "title": "Twelfth Night", "description": "", "genres": [comedy["id"]] }),
    )
    .await;

    let uri = format!(
        "/api/theatre/plays?genres={},{}",
        drama["id"], comedy["id"]
    );
    let (_, body) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let uri = format!(
        "/api/theatre/plays?genres={},{}&actors={}",
        drama["id"], comedy["id"], actor["id"]
    );
    let (_, body) = app.send(Method::GET, &uri, None, None).await;
    let plays = body["data"].as_array().unwrap();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0]["title"], "Hamlet");
    assert_eq!(plays[0]["genres"], json!(["Drama"]));
    assert_eq!(plays[0]["actors"], json!(["Judi Dench"]));

    let (status, body) = app
        .send(Method::GET, "/api/theatre/plays?genres=1,x", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn hall_dimensions_are_validated() {
    let app = spawn_app().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/theatre/theatre-halls",
            Some(&app.staff_token),
            Some(json!({ "name": "Tiny", "rows": 0, "seats_in_row": 10 })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["rows"].is_array());
}

#[tokio::test]
async fn reservation_reduces_availability() {
    let app = spawn_app().await;
    let performance = app.seed_performance().await;

    let (status, body) = app
        .reserve(json!([
            { "row": 1, "seat": 1, "performance": performance },
            { "row": 1, "seat": 2, "performance": performance },
            { "row": 2, "seat": 1, "performance": performance },
        ]))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["tickets"].as_array().unwrap().len(), 3);

    let (_, body) = app
        .send(Method::GET, "/api/theatre/performances", None, None)
        .await;
    let listed = &body["data"][0];
    assert_eq!(listed["play"], "Hamlet");
    assert_eq!(listed["theatre_hall"], "Main");
    assert_eq!(listed["tickets_available"], 97);

    let uri = format!("/api/theatre/performances/{performance}");
    let (_, body) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(body["data"]["taken_seats"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"]["play"]["genres"][0]["name"], "Drama");
}

#[tokio::test]
async fn taken_seat_conflicts_and_persists_nothing() {
    let app = spawn_app().await;
    let performance = app.seed_performance().await;

    let (status, _) = app
        .reserve(json!([{ "row": 5, "seat": 5, "performance": performance }]))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .reserve(json!([
            { "row": 5, "seat": 6, "performance": performance },
            { "row": 5, "seat": 5, "performance": performance },
        ]))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SEAT_ALREADY_TAKEN");
    assert_eq!(body["error"]["details"]["tickets"]["index"], 1);

    let (_, body) = app
        .send(Method::GET, "/api/theatre/performances", None, None)
        .await;
    assert_eq!(body["data"][0]["tickets_available"], 99);
}

#[tokio::test]
async fn duplicate_seat_within_request_is_rejected() {
    let app = spawn_app().await;
    let performance = app.seed_performance().await;

    let (status, body) = app
        .reserve(json!([
            { "row": 3, "seat": 3, "performance": performance },
            { "row": 3, "seat": 3, "performance": performance },
        ]))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SEAT_ALREADY_TAKEN");

    let (_, body) = app
        .send(
            Method::GET,
            "/api/theatre/reservations",
            Some(&app.user_token),
            None,
        )
        .await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn out_of_range_seat_is_rejected() {
    let app = spawn_app().await;
    let performance = app.seed_performance().await;

    let (status, body) = app
        .reserve(json!([{ "row": 11, "seat": 1, "performance": performance }]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "ROW_OUT_OF_RANGE");
    assert_eq!(
        body["error"]["message"],
        "Row must be in range [1, 10], not 11."
    );

    let (status, body) = app
        .reserve(json!([{ "row": 1, "seat": 0, "performance": performance }]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "SEAT_OUT_OF_RANGE");
}

#[tokio::test]
async fn empty_reservation_is_rejected() {
    let app = spawn_app().await;
    let (status, body) = app.reserve(json!([])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "EMPTY_TICKET_SET");
}

#[tokio::test]
async fn reservations_require_authentication() {
    let app = spawn_app().await;
    let (status, _) = app
        .send(Method::GET, "/api/theatre/reservations", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            Method::GET,
            "/api/theatre/reservations",
            Some("not-a-real-token"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reservations_are_private_and_deletable() {
    let app = spawn_app().await;
    let performance = app.seed_performance().await;

    let (_, body) = app
        .reserve(json!([{ "row": 1, "seat": 1, "performance": performance }]))
        .await;
    let reservation = body["data"]["id"].as_i64().unwrap();
    let uri = format!("/api/theatre/reservations/{reservation}");

    let (status, body) = app
        .send(Method::GET, &uri, Some(&app.user_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tickets"][0]["performance"]["play"], "Hamlet");

    let (status, _) = app
        .send(Method::GET, &uri, Some(&app.staff_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(Method::DELETE, &uri, Some(&app.user_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .reserve(json!([{ "row": 1, "seat": 1, "performance": performance }]))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn performance_list_filters_by_title() {
    let app = spawn_app().await;
    app.seed_performance().await;

    let (_, body) = app
        .send(Method::GET, "/api/theatre/performances?play=haml", None, None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = app
        .send(Method::GET, "/api/theatre/performances?play=lear", None, None)
        .await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn user_register_token_and_me() {
    let app = spawn_app().await;
    let creds = json!({ "email": "New@Theatre.test", "password": "12345" });

    let (status, body) = app
        .send(Method::POST, "/api/user/register", None, Some(creds.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["email"], "new@theatre.test");
    assert_eq!(body["data"]["is_staff"], false);

    let (status, body) = app
        .send(Method::POST, "/api/user/token", None, Some(creds))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(Method::GET, "/api/user/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "new@theatre.test");
    assert!(body["data"].get("password_hash").is_none());

    let (status, _) = app
        .send(
            Method::POST,
            "/api/user/token",
            None,
            Some(json!({ "email": "new@theatre.test", "password": "wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

fn png_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    image::RgbImage::new(1, 1)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

impl TestApp {
    async fn upload(
        &self,
        uri: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let boundary = "theatre-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.staff_token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn upload_uri(&self) -> String {
        let play = self
            .staff_post(
                "/api/theatre/plays",
                json!({ "title": "The Tempest", "description": "" }),
            )
            .await;
        format!("/api/theatre/plays/{}/upload-image", play["id"])
    }
}

#[tokio::test]
async fn image_upload_rejects_non_image_bytes() {
    let app = spawn_app().await;
    let uri = app.upload_uri().await;

    let (status, body) = app
        .upload(&uri, "poster.png", "image/png", b"fake-bytes")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = app
        .upload(
            &uri,
            "poster.html",
            "image/png",
            b"<html><script>alert(1)</script></html>",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(!app.media_root.join("upload/plays").exists());
}

#[tokio::test]
async fn image_upload_names_file_after_detected_format() {
    let app = spawn_app().await;
    let uri = app.upload_uri().await;

    // The client's filename and content type do not pick the extension.
    let (status, body) = app
        .upload(&uri, "poster.html", "text/html", &png_bytes())
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let image = body["data"]["image"].as_str().unwrap();
    assert!(image.starts_with("upload/plays/the-tempest-"));
    assert!(image.ends_with(".png"));
    assert!(app.media_root.join(image).is_file());
}

#[tokio::test]
async fn image_reupload_removes_previous_file() {
    let app = spawn_app().await;
    let uri = app.upload_uri().await;

    let (_, body) = app
        .upload(&uri, "first.png", "image/png", &png_bytes())
        .await;
    let first = body["data"]["image"].as_str().unwrap().to_string();

    let (status, body) = app
        .upload(&uri, "second.png", "image/png", &png_bytes())
        .await;
    assert_eq!(status, StatusCode::OK);
    let second = body["data"]["image"].as_str().unwrap().to_string();

    assert_ne!(first, second);
    assert!(!app.media_root.join(&first).exists());
    assert!(app.media_root.join(&second).is_file());
}

#[tokio::test]
async fn revoked_token_is_rejected() {
    let app = spawn_app().await;
    let creds = json!({ "email": "leaving@theatre.test", "password": "12345" });
    app.send(Method::POST, "/api/user/register", None, Some(creds.clone()))
        .await;
    let (_, body) = app
        .send(Method::POST, "/api/user/token", None, Some(creds))
        .await;
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(Method::DELETE, "/api/user/token", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(Method::GET, "/api/user/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Other sessions are untouched.
    let (status, _) = app
        .send(Method::GET, "/api/user/me", Some(&app.user_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn hall_cannot_shrink_below_sold_seats() {
    let app = spawn_app().await;
    let performance = app.seed_performance().await;
    let (status, _) = app
        .reserve(json!([
            { "row": 5, "seat": 5, "performance": performance },
            { "row": 6, "seat": 6, "performance": performance },
        ]))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/theatre/performances/{performance}");
    let (_, body) = app.send(Method::GET, &uri, None, None).await;
    let hall_uri = format!(
        "/api/theatre/theatre-halls/{}",
        body["data"]["theatre_hall"]["id"]
    );

    let (status, body) = app
        .send(
            Method::PUT,
            &hall_uri,
            Some(&app.staff_token),
            Some(json!({ "name": "Main", "rows": 1, "seats_in_row": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["rows"].is_array());

    // Shrinking down to the furthest sold seat is allowed.
    let (status, _) = app
        .send(
            Method::PUT,
            &hall_uri,
            Some(&app.staff_token),
            Some(json!({ "name": "Main", "rows": 6, "seats_in_row": 6 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(Method::GET, "/api/theatre/performances", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["tickets_available"], 34);
}

#[tokio::test]
async fn performance_cannot_move_to_a_smaller_hall() {
    let app = spawn_app().await;
    let performance = app.seed_performance().await;
    app.reserve(json!([{ "row": 8, "seat": 2, "performance": performance }]))
        .await;

    let small = app
        .staff_post(
            "/api/theatre/theatre-halls",
            json!({ "name": "Studio", "rows": 4, "seats_in_row": 10 }),
        )
        .await;
    let uri = format!("/api/theatre/performances/{performance}");
    let (_, body) = app.send(Method::GET, &uri, None, None).await;
    let play = body["data"]["play"]["id"].clone();

    let (status, body) = app
        .send(
            Method::PUT,
            &uri,
            Some(&app.staff_token),
            Some(json!({
                "play": play,
                "theatre_hall": small["id"],
                "show_time": "2030-05-02T19:00:00Z",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["theatre_hall"].is_array());

    let (_, body) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(body["data"]["theatre_hall"]["name"], "Main");
    assert_eq!(body["data"]["taken_seats"].as_array().unwrap().len(), 1);
}
