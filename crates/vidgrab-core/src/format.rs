use std::sync::LazyLock;

use regex::Regex;

static FILENAME_EXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)filename\*\s*=\s*[^']*'[^']*'([^;\s]+)"#).unwrap());
static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"([^"]*)"|'([^']*)'|([^;]*))"#).unwrap()
});

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

pub fn format_file_size(bytes: Option<u64>) -> String {
    let bytes = match bytes {
        Some(value) if value > 0 => value,
        _ => return "unknown size".to_string(),
    };
    let size = bytes as f64;
    if size < KIB {
        format!("{bytes} B")
    } else if size < MIB {
        format!("{:.1} KB", size / KIB)
    } else if size < GIB {
        format!("{:.1} MB", size / MIB)
    } else {
        format!("{:.1} GB", size / GIB)
    }
}

pub fn format_duration(seconds: f64) -> String {
    if !(seconds >= 1.0) {
        return "unknown duration".to_string();
    }
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub fn format_progress(progress: f64) -> String {
    let progress = if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    };
    format!("{progress:.1}%")
}

/// Keeps ASCII letters, digits and spaces so the title is safe as a filename.
pub fn clean_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn video_filename(title: &str, quality: &str) -> String {
    let title = clean_title(title);
    if quality == "audio" {
        format!("{title}.mp3")
    } else {
        format!("{title}_{quality}.mp4")
    }
}

pub fn playlist_filename(title: &str, quality: &str) -> String {
    format!("{}_{quality}.zip", clean_title(title))
}

pub fn download_key(url: &str, quality: &str) -> String {
    format!("{url}_{quality}")
}

pub fn playlist_key(quality: &str) -> String {
    format!("playlist_{quality}")
}

/// Extracts the attachment filename from a `Content-Disposition` header value.
///
/// The RFC 5987 `filename*` form wins over plain `filename`. Only the last
/// path component is returned.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let extended = FILENAME_EXT_RE
        .captures(header)
        .and_then(|caps| caps.get(1))
        .and_then(|m| urlencoding::decode(m.as_str()).ok())
        .map(|decoded| decoded.into_owned());

    let name = extended.or_else(|| {
        let caps = FILENAME_RE.captures(header)?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string())
    })?;

    let name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}
