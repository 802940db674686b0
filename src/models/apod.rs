use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A stored APOD row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApodEntry {
    pub date: NaiveDate,
    pub title: String,
    pub explanation: Option<String>,
    pub media_type: Option<String>,
    pub url: Option<String>,
    pub hdurl: Option<String>,
    pub thumbnail_url: Option<String>,
    pub service_version: Option<String>,
    pub copyright: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// A normalized entry ready to be written. `fetched_at` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApodEntry {
    pub date: NaiveDate,
    pub title: String,
    pub explanation: Option<String>,
    pub media_type: Option<String>,
    pub url: Option<String>,
    pub hdurl: Option<String>,
    pub thumbnail_url: Option<String>,
    pub service_version: Option<String>,
    pub copyright: Option<String>,
}

impl NewApodEntry {
    pub fn is_video(&self) -> bool {
        self.media_type.as_deref() == Some("video")
    }
}

impl ApodEntry {
    /// Drops the write timestamp, leaving only the fields a fetch determines.
    pub fn into_new(self) -> NewApodEntry {
        NewApodEntry {
            date: self.date,
            title: self.title,
            explanation: self.explanation,
            media_type: self.media_type,
            url: self.url,
            hdurl: self.hdurl,
            thumbnail_url: self.thumbnail_url,
            service_version: self.service_version,
            copyright: self.copyright,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub media_type: Option<String>,
}
