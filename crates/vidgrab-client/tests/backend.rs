use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vidgrab_client::{BackendClient, CancellationToken, Submission, TaskPoller, TaskState};
use vidgrab_core::{DownloadRequest, MediaFormat, PreviewKind, Quality, VidgrabError};

#[derive(Default)]
struct MockBackend {
    polls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

type Shared = Arc<MockBackend>;

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

fn attachment(filename: Option<&str>, body: &'static [u8]) -> Response {
    let mut response = ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response();
    if let Some(name) = filename {
        let value = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")).unwrap();
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

async fn start_download(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    backend.bodies.lock().unwrap().push(body.clone());
    let url = body["url"].as_str().unwrap_or_default();
    if url.is_empty() {
        return error(StatusCode::BAD_REQUEST, "URL is required");
    }
    if url.contains("private") {
        return error(StatusCode::BAD_REQUEST, "Video unavailable");
    }
    if url.contains("direct") {
        return attachment(Some("direct_720p.mp4"), b"direct-bytes");
    }
    if url.contains("nameless") {
        return attachment(None, b"raw-bytes");
    }
    if url.contains("broken") {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    if url.contains("quota") {
        return Json(json!({ "status": "error", "message": "Quota exceeded" })).into_response();
    }
    if url.contains("queued") {
        return Json(json!({ "status": "queued" })).into_response();
    }
    let task_id = if url.contains("fails") { "task-err" } else { "task-ok" };
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "task_id": task_id })),
    )
        .into_response()
}

async fn status(State(backend): State<Shared>, Path(id): Path<String>) -> Response {
    match id.as_str() {
        "task-ok" => {
            let body = match backend.polls.fetch_add(1, Ordering::SeqCst) {
                0 => json!({ "status": "downloading", "progress": 40.0 }),
                1 => json!({ "status": "merging", "progress": 100.0 }),
                _ => json!({
                    "status": "complete",
                    "progress": 100.0,
                    "filename": "clip_720p.mp4"
                }),
            };
            Json(body).into_response()
        }
        "task-err" => {
            let body = json!({ "status": "error", "progress": 0, "message": "Test error" });
            Json(body).into_response()
        }
        "task-slow" => Json(json!({ "status": "downloading", "progress": 10.0 })).into_response(),
        _ => error(StatusCode::NOT_FOUND, "Task not found"),
    }
}

async fn download_file(Path(id): Path<String>) -> Response {
    if id == "task-ok" {
        attachment(Some("clip_720p.mp4"), b"video-bytes")
    } else {
        error(StatusCode::NOT_FOUND, "File not ready or task not found")
    }
}

async fn preview(Json(body): Json<Value>) -> Response {
    let url = body["url"].as_str().unwrap_or_default().to_string();
    let payload = if url.contains("playlist") {
        json!({
            "status": "success",
            "type": "playlist",
            "title": "Road Trip Mix",
            "count": 2,
            "entries": [
                {
                    "title": "One",
                    "duration": 61,
                    "url": "https://videos.test/watch?v=1",
                    "formats": []
                },
                {
                    "title": "Two",
                    "duration": 62,
                    "url": "https://videos.test/watch?v=2",
                    "formats": []
                }
            ],
            "common_qualities": ["720p", "audio"]
        })
    } else {
        json!({
            "status": "success",
            "type": "video",
            "title": "Test Video",
            "duration": 120,
            "url": url,
            "formats": [
                { "quality": "audio", "type": "audio", "filesize": 1000000, "ext": "mp3" },
                { "quality": "720p", "type": "video", "filesize": 50000000, "ext": "mp4" }
            ]
        })
    };
    Json(payload).into_response()
}

async fn download_video(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    backend.bodies.lock().unwrap().push(body);
    attachment(None, b"video-bytes")
}

async fn download_playlist(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    backend.bodies.lock().unwrap().push(body);
    attachment(None, b"zip-bytes")
}

async fn spawn_backend() -> (BackendClient, Shared) {
    let backend = Shared::default();
    let app = Router::new()
        .route(
            "/health",
            get(|| async {
                Json(json!({ "status": "healthy", "service": "youtube-downloader-backend" }))
            }),
        )
        .route("/api/download", post(start_download))
        .route("/api/status/{id}", get(status))
        .route("/api/download-file/{id}", get(download_file))
        .route("/api/preview", post(preview))
        .route("/api/download-video", post(download_video))
        .route("/api/download-playlist", post(download_playlist))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = BackendClient::new(format!("http://{addr}")).unwrap();
    (client, backend)
}

fn request(url: &str) -> DownloadRequest {
    DownloadRequest {
        url: url.to_string(),
        format: MediaFormat::Video,
        quality: Quality::P720,
    }
}

#[tokio::test]
async fn health_reports_service() {
    let (client, _) = spawn_backend().await;
    let health = client.health().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service.as_deref(), Some("youtube-downloader-backend"));
}

#[tokio::test]
async fn start_download_returns_task_id() {
    let (client, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let submission = client
        .start_download(&request("https://videos.test/watch?v=1"), dir.path())
        .await
        .unwrap();
    assert_eq!(submission, Submission::Task("task-ok".to_string()));

    let bodies = backend.bodies.lock().unwrap();
    assert_eq!(bodies[0]["format"], "video");
    assert_eq!(bodies[0]["quality"], "720p");
}

#[tokio::test]
async fn start_download_saves_direct_reply() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let submission = client
        .start_download(&request("https://videos.test/direct"), dir.path())
        .await
        .unwrap();
    let saved = match submission {
        Submission::File(saved) => saved,
        other => panic!("expected a file, got {other:?}"),
    };
    assert_eq!(saved.filename, "direct_720p.mp4");
    assert_eq!(saved.bytes, 12);
    assert_eq!(std::fs::read(&saved.path).unwrap(), b"direct-bytes");
}

#[tokio::test]
async fn start_download_surfaces_backend_message() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let result = client
        .start_download(&request("https://videos.test/private"), dir.path())
        .await;
    assert!(matches!(result, Err(VidgrabError::Api(msg)) if msg == "Video unavailable"));
}

#[tokio::test]
async fn start_download_without_json_reports_status_code() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let result = client
        .start_download(&request("https://videos.test/broken"), dir.path())
        .await;
    match result {
        Err(VidgrabError::Api(msg)) => assert_eq!(msg, "server responded with status: 502"),
        other => panic!("expected api error, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn start_download_error_body_on_success_status() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let result = client
        .start_download(&request("https://videos.test/quota"), dir.path())
        .await;
    assert!(matches!(result, Err(VidgrabError::Api(msg)) if msg == "Quota exceeded"));
}

#[tokio::test]
async fn start_download_unrecognised_json_reply() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let result = client
        .start_download(&request("https://videos.test/queued"), dir.path())
        .await;
    assert!(
        matches!(result, Err(VidgrabError::Api(msg)) if msg == "An unknown backend error occurred.")
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn start_download_without_disposition_saves_as_download() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let submission = client
        .start_download(&request("https://videos.test/nameless"), dir.path())
        .await
        .unwrap();
    let saved = match submission {
        Submission::File(saved) => saved,
        other => panic!("expected a file, got {other:?}"),
    };
    assert_eq!(saved.filename, "download");
    assert_eq!(saved.path, dir.path().join("download"));
    assert_eq!(std::fs::read(&saved.path).unwrap(), b"raw-bytes");
}

/// Serves one download response that sends a first chunk and then stalls.
async fn spawn_stalling_backend() -> BackendClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: video/mp4\r\n\
                    Content-Disposition: attachment; filename=\"big.mp4\"\r\n\
                    Content-Length: 1000000\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(b"first-chunk").await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    BackendClient::new(format!("http://{addr}")).unwrap()
}

#[tokio::test]
async fn cancelled_transfer_leaves_no_file() {
    let client = spawn_stalling_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let req = request("https://videos.test/big");
    let transfer = client.start_download(&req, dir.path());
    let finished = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = transfer => true,
    };
    assert!(!finished);

    let left: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert!(left.is_empty(), "files left after cancel: {left:?}");
}

#[tokio::test]
async fn status_of_unknown_task() {
    let (client, _) = spawn_backend().await;
    let result = client.status("nope").await;
    assert!(matches!(result, Err(VidgrabError::Api(msg)) if msg == "Task not found"));
}

#[tokio::test]
async fn poller_follows_task_to_completion() {
    let (client, _) = spawn_backend().await;
    let poller = TaskPoller::new(client.clone(), Duration::from_millis(10));
    let cancel = CancellationToken::new();

    let mut labels = Vec::new();
    let completed = poller
        .wait("task-ok", &cancel, |state: &TaskState| labels.push(state.label()))
        .await
        .unwrap();

    assert_eq!(
        labels,
        vec![
            "Starting...".to_string(),
            "Downloading... 40.0%".to_string(),
            "Merging audio and video...".to_string(),
            "Complete: clip_720p.mp4".to_string(),
        ]
    );
    assert_eq!(completed.filename.as_deref(), Some("clip_720p.mp4"));
    assert!(completed.download_url.ends_with("/api/download-file/task-ok"));

    let dir = tempfile::tempdir().unwrap();
    let saved = client.download_file(&completed.task_id, dir.path()).await.unwrap();
    assert_eq!(saved.filename, "clip_720p.mp4");
    assert_eq!(std::fs::read(&saved.path).unwrap(), b"video-bytes");
}

#[tokio::test]
async fn first_poll_waits_one_interval() {
    let (client, backend) = spawn_backend().await;
    let interval = Duration::from_millis(200);
    let poller = TaskPoller::new(client, interval);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let mut first_report = None;
    poller
        .wait("task-ok", &cancel, |state| {
            if first_report.is_none() && state.label() != "Starting..." {
                first_report = Some(started.elapsed());
            }
        })
        .await
        .unwrap();

    assert!(first_report.unwrap() >= interval);
    assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn poller_reports_task_error() {
    let (client, _) = spawn_backend().await;
    let poller = TaskPoller::new(client, Duration::from_millis(10));
    let cancel = CancellationToken::new();

    let mut last = TaskState::default();
    let result = poller
        .wait("task-err", &cancel, |state| last = state.clone())
        .await;
    assert!(matches!(result, Err(VidgrabError::TaskFailed(msg)) if msg == "Test error"));
    assert_eq!(last.label(), "Error: Test error");
}

#[tokio::test]
async fn poller_stops_on_http_error() {
    let (client, _) = spawn_backend().await;
    let poller = TaskPoller::new(client, Duration::from_millis(10));
    let cancel = CancellationToken::new();

    let mut polls = 0;
    let result = poller
        .wait("missing", &cancel, |state| {
            if state.is_terminal() {
                polls += 1;
            }
        })
        .await;
    assert!(matches!(result, Err(VidgrabError::Api(msg)) if msg == "Task not found"));
    assert_eq!(polls, 1);
}

#[tokio::test]
async fn poller_stops_when_cancelled() {
    let (client, _) = spawn_backend().await;
    let poller = TaskPoller::new(client, Duration::from_millis(10));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        trigger.cancel();
    });

    let result = poller.wait("task-slow", &cancel, |_| {}).await;
    assert!(matches!(result, Err(VidgrabError::Cancelled)));
}

#[tokio::test]
async fn download_file_for_unfinished_task() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let result = client.download_file("task-slow", dir.path()).await;
    assert!(
        matches!(result, Err(VidgrabError::Api(msg)) if msg == "File not ready or task not found")
    );
}

#[tokio::test]
async fn preview_then_download_video_uses_title_for_filename() {
    let (client, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let preview = client
        .preview("https://videos.test/watch?v=test")
        .await
        .unwrap();
    assert_eq!(preview.kind, PreviewKind::Video);
    assert_eq!(preview.formats.len(), 2);

    let url = preview.url.as_deref().unwrap();
    let saved = client
        .download_video(url, "720p", &preview.title, dir.path())
        .await
        .unwrap();
    assert_eq!(saved.filename, "Test Video_720p.mp4");

    let audio = client
        .download_video(url, "audio", &preview.title, dir.path())
        .await
        .unwrap();
    assert_eq!(audio.filename, "Test Video.mp3");

    let bodies = backend.bodies.lock().unwrap();
    assert_eq!(bodies[0], json!({ "url": url, "quality": "720p" }));
}

#[tokio::test]
async fn playlist_download_sends_every_entry() {
    let (client, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let preview = client
        .preview("https://videos.test/playlist?list=mix")
        .await
        .unwrap();
    assert_eq!(preview.kind, PreviewKind::Playlist);
    let quality = preview.default_playlist_quality().unwrap().to_string();
    let urls: Vec<String> = preview.entries.iter().map(|entry| entry.url.clone()).collect();

    let saved = client
        .download_playlist(&urls, &quality, &preview.title, dir.path())
        .await
        .unwrap();
    assert_eq!(saved.filename, "Road Trip Mix_720p.zip");

    let bodies = backend.bodies.lock().unwrap();
    assert_eq!(bodies[0]["urls"].as_array().unwrap().len(), 2);
    assert_eq!(bodies[0]["playlist_title"], "Road Trip Mix");
}

#[tokio::test]
async fn repeated_downloads_do_not_overwrite() {
    let (client, _) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let first = client.download_file("task-ok", dir.path()).await.unwrap();
    let second = client.download_file("task-ok", dir.path()).await.unwrap();
    assert_eq!(first.filename, "clip_720p.mp4");
    assert_eq!(second.filename, "clip_720p (1).mp4");
}
