use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use retrospace::config::ServiceConfig;
use retrospace::server::{self, AppState};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "retrospace-test-boundary";
const PUBLIC_URL: &str = "http://localhost:3000";

async fn test_app() -> (Router, AppState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServiceConfig::new(dir.path());
    config.signing_secret = Some("integration-secret".to_string());

    let mut state = AppState::open(&config, PUBLIC_URL.to_string()).await.unwrap();
    state.auth = state.auth.with_cost(4);

    (server::create_router(state.clone()), state, dir)
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/functions/v1/upload-song")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn neon_upload() -> Request<Body> {
    upload_request(multipart_body(
        &[("title", "Neon"), ("artist", "Rider"), ("userId", "u1")],
        Some(("track.mp3", "audio/mpeg", b"ID3 fake mp3 payload")),
    ))
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Sign up and sign in, returning the session token and user id.
async fn signed_in(app: &Router, email: &str) -> (String, String) {
    let credentials = json!({ "email": email, "password": "hunter22" });

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/auth/signup", None, credentials.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/auth/signin", None, credentials))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = body_json(response).await;

    (
        session["access_token"].as_str().unwrap().to_string(),
        session["user"]["id"].as_str().unwrap().to_string(),
    )
}

fn stored_objects(dir: &TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path().join("songs"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| !name.starts_with('.'))
        .collect()
}

#[tokio::test]
async fn upload_stores_object_and_records_song() {
    let (app, state, dir) = test_app().await;

    let response = app.oneshot(neon_upload()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );

    let receipt = body_json(response).await;
    assert_eq!(receipt["message"], "Song uploaded successfully");
    let file_path = receipt["filePath"].as_str().unwrap();
    let (id, extension) = file_path.rsplit_once('.').unwrap();
    assert_eq!(extension, "mp3");
    assert!(uuid::Uuid::parse_str(id).is_ok());

    let song = state.songs.find_by_path(file_path).await.unwrap().unwrap();
    assert_eq!(song.title, "Neon");
    assert_eq!(song.artist, "Rider");
    assert_eq!(song.user_id, "u1");

    assert_eq!(stored_objects(&dir), vec![file_path.to_string()]);
    let stored = std::fs::read(dir.path().join("songs").join(file_path)).unwrap();
    assert_eq!(stored, b"ID3 fake mp3 payload");
}

#[tokio::test]
async fn upload_with_missing_title_is_rejected_without_side_effects() {
    let (app, state, dir) = test_app().await;

    let request = upload_request(multipart_body(
        &[("artist", "Rider"), ("userId", "u1")],
        Some(("track.mp3", "audio/mpeg", b"data")),
    ));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "authorization, x-client-info, apikey, content-type"
    );

    let body = body_json(response).await;
    assert_eq!(body["error"], "Missing required fields: title");

    assert!(stored_objects(&dir).is_empty());
    assert!(state.songs.list_songs().await.unwrap().is_empty());
}

#[tokio::test]
async fn upload_without_file_part_is_rejected() {
    let (app, _state, dir) = test_app().await;

    let request = upload_request(multipart_body(
        &[("title", "Neon"), ("artist", "Rider"), ("userId", "u1")],
        None,
    ));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Missing required fields: file");
    assert!(stored_objects(&dir).is_empty());
}

#[tokio::test]
async fn non_multipart_body_is_an_unexpected_error() {
    let (app, _state, _dir) = test_app().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/functions/v1/upload-song")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "An unexpected error occurred");
    assert!(body["details"].is_string());
}

#[tokio::test]
async fn preflight_returns_cors_headers_and_empty_body() {
    let (app, _state, _dir) = test_app().await;

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/functions/v1/upload-song")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "authorization, x-client-info, apikey, content-type"
    );
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn same_file_name_gets_distinct_storage_paths() {
    let (app, state, dir) = test_app().await;

    let responses = futures::future::join_all((0..3).map(|_| app.clone().oneshot(neon_upload()))).await;

    let mut paths = Vec::new();
    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        paths.push(body_json(response).await["filePath"].as_str().unwrap().to_string());
    }
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 3);

    assert_eq!(stored_objects(&dir).len(), 3);
    assert_eq!(state.songs.list_songs().await.unwrap().len(), 3);
}

#[tokio::test]
async fn songs_are_listed_newest_first() {
    let (app, _state, _dir) = test_app().await;

    for title in ["First", "Second"] {
        let request = upload_request(multipart_body(
            &[("title", title), ("artist", "Rider"), ("userId", "u1")],
            Some(("a.ogg", "audio/ogg", b"ogg")),
        ));
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
    }

    let response = app.oneshot(get_request("/songs", None)).await.unwrap();
    let songs = body_json(response).await;
    let titles: Vec<_> = songs
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, ["Second", "First"]);
}

#[tokio::test]
async fn auth_flow_issues_and_resolves_sessions() {
    let (app, _state, _dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(get_request("/auth/user", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (token, user_id) = signed_in(&app, "Listener@Example.com").await;

    let response = app
        .clone()
        .oneshot(get_request("/auth/user", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let user = body_json(response).await;
    assert_eq!(user["id"], user_id.as_str());
    assert_eq!(user["email"], "listener@example.com");

    let duplicate = json!({ "email": "listener@example.com", "password": "hunter22" });
    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/auth/signup", None, duplicate))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let wrong = json!({ "email": "listener@example.com", "password": "nope-nope" });
    let response = app
        .oneshot(json_request(Method::POST, "/auth/signin", None, wrong))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn playlist_songs_come_back_in_insertion_order() {
    let (app, state, _dir) = test_app().await;
    let (token, _) = signed_in(&app, "mixer@example.com").await;

    for title in ["One", "Two"] {
        let request = upload_request(multipart_body(
            &[("title", title), ("artist", "Band"), ("userId", "u1")],
            Some(("song.flac", "audio/flac", b"flac")),
        ));
        app.clone().oneshot(request).await.unwrap();
    }
    // Newest first, so "Two" is at index 0.
    let songs = state.songs.list_songs().await.unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/playlists",
            Some(&token),
            json!({ "title": " Road trip ", "description": "" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let playlist = body_json(response).await;
    assert_eq!(playlist["title"], "Road trip");
    assert!(playlist["description"].is_null());
    let playlist_id = playlist["id"].as_str().unwrap().to_string();

    for song in &songs {
        let uri = format!("/playlists/{}/songs/{}", playlist_id, song.id);
        let response = app
            .clone()
            .oneshot(json_request(Method::POST, &uri, Some(&token), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(get_request(&format!("/playlists/{}/songs", playlist_id), None))
        .await
        .unwrap();
    let ordered = body_json(response).await;
    let titles: Vec<_> = ordered
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, ["Two", "One"]);

    let response = app
        .clone()
        .oneshot(get_request("/playlists", Some(&token)))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = app
        .oneshot(get_request("/playlists/missing/songs", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn playlists_require_a_session() {
    let (app, _state, _dir) = test_app().await;

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/playlists",
            None,
            json!({ "title": "Mix" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_url_streams_object_with_range_support() {
    let (app, _state, _dir) = test_app().await;
    let (token, user_id) = signed_in(&app, "player@example.com").await;

    let request = upload_request(multipart_body(
        &[("title", "Neon"), ("artist", "Rider"), ("userId", &user_id)],
        Some(("track.mp3", "audio/mpeg", b"0123456789")),
    ));
    let receipt = body_json(app.clone().oneshot(request).await.unwrap()).await;
    let file_path = receipt["filePath"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/storage/sign",
            Some(&token),
            json!({ "path": file_path, "expiresIn": 60 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let signed = body_json(response).await;
    assert!(signed["expiresAt"].is_i64());
    let signed_url = signed["signedUrl"].as_str().unwrap();
    let uri = signed_url.strip_prefix(PUBLIC_URL).unwrap().to_string();
    assert!(uri.starts_with(&format!("/storage/object/sign/songs/{}?token=", file_path)));

    let response = app.clone().oneshot(get_request(&uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(body_bytes(response).await, b"0123456789");

    let request = Request::builder()
        .uri(&uri)
        .header(header::RANGE, "bytes=2-5")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    assert_eq!(body_bytes(response).await, b"2345");

    let tampered = format!("{}x", uri);
    let response = app.oneshot(get_request(&tampered, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn signing_requires_session_and_existing_object() {
    let (app, _state, _dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/storage/sign",
            None,
            json!({ "path": "missing.mp3" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (token, _) = signed_in(&app, "someone@example.com").await;
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/storage/sign",
            Some(&token),
            json!({ "path": "missing.mp3" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_expiry_is_rejected() {
    let (app, _state, _dir) = test_app().await;
    let (token, user_id) = signed_in(&app, "greedy@example.com").await;

    let request = upload_request(multipart_body(
        &[("title", "Neon"), ("artist", "Rider"), ("userId", &user_id)],
        Some(("track.mp3", "audio/mpeg", b"0123456789")),
    ));
    let receipt = body_json(app.clone().oneshot(request).await.unwrap()).await;
    let file_path = receipt["filePath"].as_str().unwrap();

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/storage/sign",
            Some(&token),
            json!({ "path": file_path, "expiresIn": u64::MAX }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
