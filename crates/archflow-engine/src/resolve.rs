//! Turns terminal status payloads into displayable URLs.
//!
//! Media entries live under `result.media` (or top-level `media`). Within an
//! entry the generated object is `image.generatedImage`, then `image`, then
//! the entry itself. Inline base64 always beats a hosted URL. Media ids stay
//! index-aligned with the URLs they belong to.

use archflow_contracts::media::{MediaResult, VideoResult};
use archflow_contracts::JobError;
use serde_json::{Map, Value};

pub(crate) const IMAGE_URL_KEYS: &[&str] = &["fifeUrl", "imageUrl", "url"];
const VIDEO_URL_KEYS: &[&str] = &["fifeUrl", "videoUrl", "url"];
const MEDIA_ID_KEYS: &[&str] = &["mediaGenerationId", "mediaId", "name"];

pub fn resolve_images(payload: &Value) -> Result<MediaResult, JobError> {
    let mut result = MediaResult {
        project_id: project_id(payload),
        ..MediaResult::default()
    };
    for entry in media_entries(payload) {
        let generated = generated_object(entry, "image", "generatedImage");
        let Some(url) = pick_url(generated, "encodedImage", "image/jpeg", IMAGE_URL_KEYS) else {
            continue;
        };
        result.image_urls.push(url);
        result.media_ids.push(media_id(entry, generated));
    }
    if result.image_urls.is_empty() {
        return Err(JobError::NoImageData);
    }
    Ok(result)
}

pub fn resolve_video(payload: &Value) -> Result<VideoResult, JobError> {
    let mut result = VideoResult {
        project_id: project_id(payload),
        ..VideoResult::default()
    };
    for entry in media_entries(payload) {
        let generated = generated_object(entry, "video", "generatedVideo");
        let Some(url) = pick_url(generated, "encodedVideo", "video/mp4", VIDEO_URL_KEYS) else {
            continue;
        };
        result.video_urls.push(url);
        result.media_ids.push(media_id(entry, generated));
    }
    if result.video_urls.is_empty() {
        return Err(JobError::NoImageData);
    }
    Ok(result)
}

/// Upscale tasks finish with a single image under `result`.
pub fn resolve_upscale(payload: &Value) -> Result<String, JobError> {
    let result = payload.get("result").and_then(Value::as_object);
    let candidates = result
        .into_iter()
        .chain(payload.as_object())
        .collect::<Vec<&Map<String, Value>>>();
    candidates
        .into_iter()
        .find_map(|obj| pick_url(obj, "encodedImage", "image/jpeg", IMAGE_URL_KEYS))
        .or_else(|| resolve_images(payload).ok().and_then(|media| media.image_urls.into_iter().next()))
        .ok_or(JobError::NoImageData)
}

fn media_entries(payload: &Value) -> Vec<&Map<String, Value>> {
    payload
        .get("result")
        .and_then(|result| result.get("media"))
        .or_else(|| payload.get("media"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn generated_object<'a>(
    entry: &'a Map<String, Value>,
    kind: &str,
    generated_key: &str,
) -> &'a Map<String, Value> {
    let nested = entry.get(kind).and_then(Value::as_object);
    nested
        .and_then(|obj| obj.get(generated_key))
        .and_then(Value::as_object)
        .or(nested)
        .unwrap_or(entry)
}

fn pick_url(
    obj: &Map<String, Value>,
    encoded_key: &str,
    mime: &str,
    url_keys: &[&str],
) -> Option<String> {
    if let Some(encoded) = non_empty_str(obj, encoded_key) {
        if encoded.starts_with("data:") {
            return Some(encoded.to_string());
        }
        return Some(format!("data:{mime};base64,{encoded}"));
    }
    url_keys
        .iter()
        .find_map(|key| non_empty_str(obj, key))
        .map(str::to_string)
}

fn media_id(entry: &Map<String, Value>, generated: &Map<String, Value>) -> Option<String> {
    MEDIA_ID_KEYS
        .iter()
        .find_map(|key| non_empty_str(generated, key).or_else(|| non_empty_str(entry, key)))
        .map(str::to_string)
}

fn project_id(payload: &Value) -> Option<String> {
    payload
        .get("projectId")
        .or_else(|| payload.get("result").and_then(|result| result.get("projectId")))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
