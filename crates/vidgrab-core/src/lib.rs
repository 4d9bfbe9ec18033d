mod error;
mod format;
mod model;

pub use error::{VidgrabError, VidgrabResult};
pub use format::{
    clean_title, download_key, filename_from_disposition, format_duration, format_file_size,
    format_progress, playlist_filename, playlist_key, video_filename,
};
pub use model::{
    DownloadRequest, ErrorBody, HealthReport, MediaFormat, PlaylistDownloadRequest, PreviewData,
    PreviewKind, PreviewRequest, Quality, StatusReport, TaskAccepted, TaskStatus,
    VideoDownloadRequest, VideoFormat, VideoInfo,
};

pub fn validate_url(url: &str) -> VidgrabResult<()> {
    url::Url::parse(url).map_err(|err| VidgrabError::InvalidInput(format!("invalid url: {err}")))?;
    Ok(())
}
