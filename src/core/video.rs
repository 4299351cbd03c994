use crate::error::{Error, Result};
use url::Url;

const MAX_VIDEO_ID_LEN: usize = 128;

/// Parse and check a source reference. Only absolute http(s) URLs are accepted.
pub fn parse_source_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::input("YouTube URL is required"));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| Error::input(format!("YouTube URL is not a valid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::input(format!(
            "YouTube URL must use http or https, got '{other}'"
        ))),
    }
}

pub fn extract_video_id(url: &str) -> Option<String> {
    // watch?v=, youtu.be/ and shorts/ forms; anything else is taken as a bare id
    let raw_id = if let Some(v_param) = url.split("v=").nth(1) {
        v_param.split('&').next().unwrap_or(v_param)
    } else if let Some(youtu_be) = url.split("youtu.be/").nth(1) {
        youtu_be.split('?').next().unwrap_or(youtu_be)
    } else if let Some(shorts) = url.split("/shorts/").nth(1) {
        shorts.split(['?', '/']).next().unwrap_or(shorts)
    } else {
        url
    };

    sanitize_video_id(raw_id).ok()
}

/// Ensure a video identifier is safe for downstream use (filesystem paths, API calls, etc.).
/// Only ASCII alphanumeric characters plus `_` and `-` are allowed.
pub fn sanitize_video_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(Error::custom("Video ID cannot be empty"));
    }

    if trimmed.len() > MAX_VIDEO_ID_LEN {
        return Err(Error::custom("Video ID is unexpectedly long"));
    }

    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(Error::custom(
            "Video ID contains unsupported characters; expected only letters, numbers, '-' or '_'",
        ));
    }

    Ok(trimmed.to_string())
}

/// Name used for local artifacts and stored records when no id can be extracted.
pub fn file_stem_for(url: &str) -> String {
    extract_video_id(url).unwrap_or_else(|| "video".to_string())
}
