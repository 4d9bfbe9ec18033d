use vidgrab_core::{
    MediaFormat, PreviewData, PreviewKind, VideoFormat, format_duration, format_file_size,
};

/// Playlist entries listed before the rest is summarised.
pub const PREVIEW_ENTRY_LIMIT: usize = 20;

pub fn quality_label(quality: &str) -> String {
    if quality == "audio" {
        "Audio (MP3)".to_string()
    } else {
        quality.to_string()
    }
}

pub fn format_choice(format: &VideoFormat) -> String {
    let name = match format.kind {
        MediaFormat::Audio => "Audio (MP3)".to_string(),
        MediaFormat::Video => format.quality.clone(),
    };
    format!("{name} - {}", format_file_size(format.filesize))
}

pub fn preview_lines(preview: &PreviewData) -> Vec<String> {
    let mut lines = Vec::new();
    match preview.kind {
        PreviewKind::Video => {
            lines.push(format!("Video: {}", preview.title));
            if let Some(duration) = preview.duration {
                lines.push(format!("Duration: {}", format_duration(duration)));
            }
            for format in &preview.formats {
                lines.push(format!("  {}", format_choice(format)));
            }
        }
        PreviewKind::Playlist => {
            lines.push(format!("Playlist: {}", preview.title));
            let count = preview
                .count
                .unwrap_or(preview.entries.len() as u64);
            lines.push(format!("{count} videos"));
            for entry in preview.entries.iter().take(PREVIEW_ENTRY_LIMIT) {
                lines.push(format!(
                    "  {} ({} - {} formats available)",
                    entry.title,
                    format_duration(entry.duration.unwrap_or_default()),
                    entry.formats.len()
                ));
            }
            if preview.entries.len() > PREVIEW_ENTRY_LIMIT {
                lines.push(format!(
                    "  ... and {} more videos",
                    preview.entries.len() - PREVIEW_ENTRY_LIMIT
                ));
            }
        }
    }
    lines
}
