//! Data quality checks over the stored `apod_entries` table.
//!
//! The report answers a few plain questions: are required fields missing, do
//! dates look wrong, did a date get stored twice, are there unexpected media
//! types, and are text fields blank. It is written both as JSON and Markdown.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::QualityRow;
use crate::error::Result;

pub const ALLOWED_MEDIA_TYPES: [&str; 3] = ["image", "video", "other"];

const MAX_SAMPLES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_rows: usize,
    pub missing: MissingFields,
    pub invalid_dates: InvalidDates,
    pub duplicates: Duplicates,
    pub invalid_media_type: InvalidMediaType,
    pub empty_strings: EmptyStrings,
}

/// Rows with no value for each required field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingFields {
    pub date: usize,
    pub title: usize,
    pub media_type: usize,
    pub url: usize,
}

impl MissingFields {
    fn counts(&self) -> [(&'static str, usize); 4] {
        [
            ("date", self.date),
            ("title", self.title),
            ("media_type", self.media_type),
            ("url", self.url),
        ]
    }
}

/// Rows whose text field is missing or only whitespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyStrings {
    pub title: usize,
    pub explanation: usize,
    pub url: usize,
}

impl EmptyStrings {
    fn counts(&self) -> [(&'static str, usize); 3] {
        [
            ("title", self.title),
            ("explanation", self.explanation),
            ("url", self.url),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvalidDates {
    pub invalid_format_count: usize,
    pub out_of_range_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Duplicates {
    /// Rows whose date appears more than once.
    pub by_date: usize,
    pub unique_dates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvalidMediaType {
    pub count: usize,
    pub samples: Vec<MediaTypeSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaTypeSample {
    pub date: Option<String>,
    pub media_type: Option<String>,
}

impl QualityReport {
    pub fn from_rows(rows: &[QualityRow], today: NaiveDate) -> Self {
        let epoch = apod_epoch();

        let count_missing =
            |field: fn(&QualityRow) -> Option<&str>| rows.iter().filter(|r| field(r).is_none()).count();
        let missing = MissingFields {
            date: count_missing(|r| r.date.as_deref()),
            title: count_missing(|r| r.title.as_deref()),
            media_type: count_missing(|r| r.media_type.as_deref()),
            url: count_missing(|r| r.url.as_deref()),
        };

        let mut invalid_dates = InvalidDates::default();
        for row in rows {
            match row
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            {
                None => invalid_dates.invalid_format_count += 1,
                Some(date) if date < epoch || date > today => {
                    invalid_dates.out_of_range_count += 1
                }
                Some(_) => {}
            }
        }

        let mut date_counts: HashMap<&str, usize> = HashMap::new();
        for date in rows.iter().filter_map(|r| r.date.as_deref()) {
            *date_counts.entry(date).or_default() += 1;
        }
        let duplicates = date_counts
            .values()
            .filter(|&&n| n > 1)
            .fold(Duplicates::default(), |mut acc, &n| {
                acc.by_date += n;
                acc.unique_dates += 1;
                acc
            });

        let invalid_media: Vec<&QualityRow> = rows
            .iter()
            .filter(|r| {
                !r.media_type
                    .as_deref()
                    .is_some_and(|m| ALLOWED_MEDIA_TYPES.contains(&m))
            })
            .collect();
        let invalid_media_type = InvalidMediaType {
            count: invalid_media.len(),
            samples: invalid_media
                .iter()
                .take(MAX_SAMPLES)
                .map(|r| MediaTypeSample {
                    date: r.date.clone(),
                    media_type: r.media_type.clone(),
                })
                .collect(),
        };

        let count_blank = |field: fn(&QualityRow) -> Option<&str>| {
            rows.iter()
                .filter(|r| field(r).map_or(true, |v| v.trim().is_empty()))
                .count()
        };
        let empty_strings = EmptyStrings {
            title: count_blank(|r| r.title.as_deref()),
            explanation: count_blank(|r| r.explanation.as_deref()),
            url: count_blank(|r| r.url.as_deref()),
        };

        Self {
            total_rows: rows.len(),
            missing,
            invalid_dates,
            duplicates,
            invalid_media_type,
            empty_strings,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.missing.counts().iter().all(|&(_, n)| n == 0)
            && self.invalid_dates.invalid_format_count == 0
            && self.invalid_dates.out_of_range_count == 0
            && self.duplicates.by_date == 0
            && self.invalid_media_type.count == 0
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn write_markdown(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        std::fs::write(path, self.to_markdown())?;
        Ok(())
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# APOD Data Quality Report\n");
        let _ = writeln!(md, "Total rows: {}\n", self.total_rows);

        let _ = writeln!(md, "## Missing Required Fields");
        for (field, count) in self.missing.counts() {
            let _ = writeln!(md, "- {}: {}", field, count);
        }

        let _ = writeln!(md, "\n## Invalid Dates");
        let _ = writeln!(md, "- Invalid format: {}", self.invalid_dates.invalid_format_count);
        let _ = writeln!(md, "- Out of range: {}", self.invalid_dates.out_of_range_count);

        let _ = writeln!(md, "\n## Duplicate Dates");
        let _ = writeln!(md, "- Duplicate rows: {}", self.duplicates.by_date);
        let _ = writeln!(md, "- Unique duplicated dates: {}", self.duplicates.unique_dates);

        let _ = writeln!(md, "\n## Invalid Media Types");
        let _ = writeln!(md, "- Count: {}", self.invalid_media_type.count);
        if !self.invalid_media_type.samples.is_empty() {
            let _ = writeln!(md, "- Samples:");
            for sample in &self.invalid_media_type.samples {
                let _ = writeln!(
                    md,
                    "  - {}: {}",
                    sample.date.as_deref().unwrap_or("(no date)"),
                    sample.media_type.as_deref().unwrap_or("(none)")
                );
            }
        }

        let _ = writeln!(md, "\n## Empty Strings");
        for (field, count) in self.empty_strings.counts() {
            let _ = writeln!(md, "- {}: {}", field, count);
        }
        md
    }
}

/// First day the APOD archive has a picture for.
pub fn apod_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1995, 6, 16).unwrap_or(NaiveDate::MIN)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
