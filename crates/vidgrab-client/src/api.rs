use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use vidgrab_core::{
    DownloadRequest, ErrorBody, HealthReport, PlaylistDownloadRequest, PreviewData,
    PreviewRequest, StatusReport, TaskAccepted, VideoDownloadRequest, VidgrabError,
    VidgrabResult, filename_from_disposition, playlist_filename, validate_url, video_filename,
};

const FALLBACK_FILENAME: &str = "download";

/// A file written to disk from a backend response body.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub filename: String,
    pub bytes: u64,
}

/// What `POST /api/download` handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The backend queued a task that has to be polled.
    Task(String),
    /// The backend answered with the finished file.
    File(SavedFile),
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> VidgrabResult<Self> {
        Self::with_connect_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_connect_timeout(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> VidgrabResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("vidgrab/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| VidgrabError::Network(format!("failed to build http client: {err}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Link to the finished artifact of a task.
    pub fn download_file_url(&self, task_id: &str) -> String {
        self.endpoint(&format!("/api/download-file/{}", urlencoding::encode(task_id)))
    }

    pub async fn health(&self) -> VidgrabResult<HealthReport> {
        let response = self
            .send(self.client.get(self.endpoint("/health")), "health")
            .await?;
        read_json(response, "health").await
    }

    pub async fn preview(&self, url: &str) -> VidgrabResult<PreviewData> {
        validate_url(url)?;
        let body = PreviewRequest {
            url: url.to_string(),
        };
        let response = self
            .send(
                self.client.post(self.endpoint("/api/preview")).json(&body),
                "preview",
            )
            .await?;
        read_json(response, "preview").await
    }

    /// Submits a download. A JSON reply is either a task id or an error; any
    /// other successful body is the file itself.
    pub async fn start_download(
        &self,
        request: &DownloadRequest,
        output_dir: &Path,
    ) -> VidgrabResult<Submission> {
        validate_url(&request.url)?;
        debug!(
            url = %request.url,
            format = %request.format,
            quality = %request.quality,
            "submitting download"
        );
        let response = self
            .client
            .post(self.endpoint("/api/download"))
            .json(request)
            .send()
            .await
            .map_err(|err| VidgrabError::Network(format!("download request failed: {err}")))?;

        let status = response.status();
        if is_json(&response) {
            let body = response.text().await.map_err(|err| {
                VidgrabError::Network(format!("download response read failed: {err}"))
            })?;
            if let Ok(accepted) = serde_json::from_str::<TaskAccepted>(&body)
                && accepted.status == "accepted"
            {
                info!(task_id = %accepted.task_id, "download task accepted");
                return Ok(Submission::Task(accepted.task_id));
            }
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|error| error.message)
                .unwrap_or_else(|| {
                    if status.is_success() {
                        "An unknown backend error occurred.".to_string()
                    } else {
                        format!("server responded with status: {}", status.as_u16())
                    }
                });
            warn!(%status, %message, "download rejected by backend");
            return Err(VidgrabError::Api(message));
        }

        if !status.is_success() {
            return Err(VidgrabError::Api(format!(
                "server responded with status: {}",
                status.as_u16()
            )));
        }

        let saved = save_body(response, output_dir, FALLBACK_FILENAME).await?;
        Ok(Submission::File(saved))
    }

    pub async fn status(&self, task_id: &str) -> VidgrabResult<StatusReport> {
        let path = format!("/api/status/{}", urlencoding::encode(task_id));
        let response = self
            .send(self.client.get(self.endpoint(&path)), "status")
            .await?;
        read_json(response, "status").await
    }

    pub async fn download_file(
        &self,
        task_id: &str,
        output_dir: &Path,
    ) -> VidgrabResult<SavedFile> {
        let response = self
            .send(
                self.client.get(self.download_file_url(task_id)),
                "download-file",
            )
            .await?;
        save_body(response, output_dir, FALLBACK_FILENAME).await
    }

    pub async fn download_video(
        &self,
        url: &str,
        quality: &str,
        title: &str,
        output_dir: &Path,
    ) -> VidgrabResult<SavedFile> {
        validate_url(url)?;
        let body = VideoDownloadRequest {
            url: url.to_string(),
            quality: quality.to_string(),
        };
        let response = self
            .send(
                self.client.post(self.endpoint("/api/download-video")).json(&body),
                "download-video",
            )
            .await?;
        save_body(response, output_dir, &video_filename(title, quality)).await
    }

    pub async fn download_playlist(
        &self,
        urls: &[String],
        quality: &str,
        playlist_title: &str,
        output_dir: &Path,
    ) -> VidgrabResult<SavedFile> {
        if urls.is_empty() {
            return Err(VidgrabError::InvalidInput(
                "playlist has no entries".to_string(),
            ));
        }
        let body = PlaylistDownloadRequest {
            urls: urls.to_vec(),
            quality: quality.to_string(),
            playlist_title: playlist_title.to_string(),
        };
        let response = self
            .send(
                self.client
                    .post(self.endpoint("/api/download-playlist"))
                    .json(&body),
                "download-playlist",
            )
            .await?;
        save_body(response, output_dir, &playlist_filename(playlist_title, quality)).await
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> VidgrabResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|err| VidgrabError::Network(format!("{what} request failed: {err}")))?;
        debug!(what, status = %response.status(), "backend responded");
        if !response.status().is_success() {
            return Err(error_from_response(response, what).await);
        }
        Ok(response)
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

async fn error_from_response(response: Response, what: &str) -> VidgrabError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => {
            warn!(what, %status, %message, "backend returned an error");
            VidgrabError::Api(message)
        }
        _ => VidgrabError::Api(format!(
            "server responded with status: {}",
            status.as_u16()
        )),
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> VidgrabResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|err| VidgrabError::Parse(format!("{what} response parse failed: {err}")))
}

/// A download still being written. The file is removed when this is dropped
/// before `finish`, which covers errors and a cancelled transfer alike.
struct PartFile {
    path: PathBuf,
    target: PathBuf,
    finished: bool,
}

impl PartFile {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn save_body(
    mut response: Response,
    output_dir: &Path,
    fallback: &str,
) -> VidgrabResult<SavedFile> {
    let filename = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| fallback.to_string());

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|err| VidgrabError::Io(format!("failed to create output dir: {err}")))?;
    let (part, file) = create_part_file(output_dir, &filename).await?;
    let mut file = file;

    let mut bytes = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| VidgrabError::Network(format!("file transfer failed: {err}")))?
    {
        file.write_all(&chunk).await.map_err(|err| {
            VidgrabError::Io(format!("failed to write {}: {err}", part.path.display()))
        })?;
        bytes += chunk.len() as u64;
    }
    file.flush().await.map_err(|err| {
        VidgrabError::Io(format!("failed to write {}: {err}", part.path.display()))
    })?;
    drop(file);

    // rename replaces silently, so re-check the target right before it
    let path = if part.target.exists() {
        unique_path(output_dir, &filename)
    } else {
        part.target.clone()
    };
    tokio::fs::rename(&part.path, &path).await.map_err(|err| {
        VidgrabError::Io(format!("failed to move download to {}: {err}", path.display()))
    })?;
    part.finish();

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or(filename);
    info!(path = %path.display(), bytes, "saved file");
    Ok(SavedFile {
        path,
        filename,
        bytes,
    })
}

/// Claims `<name>.part` for the first free name in `dir`.
async fn create_part_file(
    dir: &Path,
    filename: &str,
) -> VidgrabResult<(PartFile, tokio::fs::File)> {
    loop {
        let target = unique_path(dir, filename);
        let path = part_path(&target);
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        match opened {
            Ok(file) => {
                let part = PartFile {
                    path,
                    target,
                    finished: false,
                };
                return Ok((part, file));
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(VidgrabError::Io(format!(
                    "failed to create {}: {err}",
                    path.display()
                )));
            }
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

fn is_taken(path: &Path) -> bool {
    path.exists() || part_path(path).exists()
}

/// First free path for `filename` in `dir`, adding ` (n)` before the extension.
/// A name whose `.part` file is still being written counts as taken.
fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !is_taken(&candidate) {
        return candidate;
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|path| !is_taken(path))
        .unwrap_or(candidate)
}
