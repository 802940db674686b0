use chrono::NaiveDate;
use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::NewApodEntry;

const APOD_PAGE_BASE: &str = "https://apod.nasa.gov/apod";

/// Map one raw API entry onto the stored record shape.
///
/// `date` and `title` are required. A video without a thumbnail gets one
/// derived from its URL, falling back to the APOD page for that date.
pub fn normalize_entry(raw: &Value) -> Result<NewApodEntry> {
    if !raw.is_object() {
        return Err(AppError::MalformedEntry(format!(
            "expected an object, got {}",
            raw
        )));
    }

    let date_text = text_field(raw, "date")
        .ok_or_else(|| AppError::MalformedEntry("entry is missing 'date'".to_string()))?;
    let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|_| {
        AppError::MalformedEntry(format!("entry has unparsable date '{}'", date_text))
    })?;

    let title = text_field(raw, "title").ok_or_else(|| {
        AppError::MalformedEntry(format!("entry for {} is missing 'title'", date))
    })?;

    let mut entry = NewApodEntry {
        date,
        title,
        explanation: text_field(raw, "explanation"),
        media_type: text_field(raw, "media_type"),
        url: text_field(raw, "url"),
        hdurl: text_field(raw, "hdurl"),
        thumbnail_url: text_field(raw, "thumbnail_url"),
        service_version: text_field(raw, "service_version"),
        copyright: text_field(raw, "copyright"),
    };

    if entry.is_video() && entry.thumbnail_url.is_none() {
        let thumbnail = video_thumbnail(entry.url.as_deref(), date);
        tracing::debug!("Synthesized thumbnail for {}: {}", date, thumbnail);
        entry.thumbnail_url = Some(thumbnail);
    }

    Ok(entry)
}

fn text_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn video_thumbnail(video_url: Option<&str>, date: NaiveDate) -> String {
    video_url
        .and_then(|u| Url::parse(u).ok())
        .and_then(|u| youtube_thumbnail(&u).or_else(|| vimeo_thumbnail(&u)))
        .unwrap_or_else(|| apod_page_url(date))
}

fn youtube_thumbnail(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let id = if host.ends_with("youtube.com") || host.ends_with("youtube-nocookie.com") {
        let mut segments = url.path_segments()?;
        match segments.next()? {
            "embed" | "shorts" | "v" => segments.next().map(str::to_string),
            "watch" => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            _ => None,
        }
    } else if host == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else {
        None
    }?;

    (!id.is_empty()).then(|| format!("https://img.youtube.com/vi/{}/0.jpg", id))
}

fn vimeo_thumbnail(url: &Url) -> Option<String> {
    if !url.host_str()?.ends_with("vimeo.com") {
        return None;
    }
    url.path_segments()?
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .last()
        .map(|id| format!("https://vumbnail.com/{}.jpg", id))
}

/// The APOD web page for a date, e.g. `ap240101.html`.
pub fn apod_page_url(date: NaiveDate) -> String {
    format!("{}/ap{}.html", APOD_PAGE_BASE, date.format("%y%m%d"))
}
