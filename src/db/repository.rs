use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{ApodEntry, EntryFilter, NewApodEntry};

use super::schema::SCHEMA;

const UPSERT_SQL: &str = r#"INSERT INTO apod_entries (
        date, title, explanation, media_type, url, hdurl, thumbnail_url, service_version, copyright, fetched_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
    ON CONFLICT(date) DO UPDATE SET
        title = excluded.title,
        explanation = excluded.explanation,
        media_type = excluded.media_type,
        url = excluded.url,
        hdurl = excluded.hdurl,
        thumbnail_url = excluded.thumbnail_url,
        service_version = excluded.service_version,
        copyright = excluded.copyright,
        fetched_at = excluded.fetched_at"#;

const SELECT_COLUMNS: &str = "SELECT date, title, explanation, media_type, url, hdurl, thumbnail_url, \
     service_version, copyright, fetched_at FROM apod_entries";

/// Untyped view of a stored row, as read by the quality checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityRow {
    pub date: Option<String>,
    pub title: Option<String>,
    pub explanation: Option<String>,
    pub media_type: Option<String>,
    pub url: Option<String>,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    /// Open (or create) the database and make sure the table and index exist.
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Insert the entry, or replace every field of the row already stored for its date.
    pub async fn upsert_entry(&self, entry: NewApodEntry) -> Result<()> {
        let date = entry.date;
        self.conn
            .call(move |conn| {
                write_entry(conn, &entry)?;
                Ok(())
            })
            .await
            .map_err(|source| AppError::StoreWrite { date, source })
    }

    /// Write the whole batch in one transaction and return the number of
    /// distinct dates written. The first failing record rolls everything back
    /// and is reported as `StoreWrite`.
    pub async fn upsert_entries_atomic(&self, entries: Vec<NewApodEntry>) -> Result<usize> {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for entry in &entries {
                    if let Err(e) = write_entry(&tx, entry) {
                        return Ok(Err((entry.date, e)));
                    }
                }
                tx.commit()?;
                let dates: HashSet<NaiveDate> = entries.iter().map(|e| e.date).collect();
                Ok(Ok(dates.len()))
            })
            .await?;

        outcome.map_err(|(date, e)| AppError::StoreWrite {
            date,
            source: e.into(),
        })
    }

    pub async fn get_entry(&self, date: NaiveDate) -> Result<Option<ApodEntry>> {
        let entry = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE date = ?1", SELECT_COLUMNS))?;
                let entry = stmt
                    .query_row(params![date.to_string()], entry_from_row)
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    /// Stored entries matching the filter, oldest first.
    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<ApodEntry>> {
        let start = filter.start.map(|d| d.to_string());
        let end = filter.end.map(|d| d.to_string());
        let media_type = filter.media_type.clone();

        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE (?1 IS NULL OR date >= ?1) \
                       AND (?2 IS NULL OR date <= ?2) \
                       AND (?3 IS NULL OR media_type = ?3) \
                     ORDER BY date",
                    SELECT_COLUMNS
                ))?;
                let entries = stmt
                    .query_map(params![start, end, media_type], entry_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    pub async fn count_entries(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM apod_entries", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Every row as plain text, without the typed parsing `list_entries` does.
    pub async fn quality_rows(&self) -> Result<Vec<QualityRow>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT date, title, explanation, media_type, url FROM apod_entries ORDER BY date",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(QualityRow {
                            date: row.get(0)?,
                            title: row.get(1)?,
                            explanation: row.get(2)?,
                            media_type: row.get(3)?,
                            url: row.get(4)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

fn write_entry(conn: &rusqlite::Connection, entry: &NewApodEntry) -> rusqlite::Result<usize> {
    conn.execute(
        UPSERT_SQL,
        params![
            entry.date.to_string(),
            entry.title,
            entry.explanation,
            entry.media_type,
            entry.url,
            entry.hdurl,
            entry.thumbnail_url,
            entry.service_version,
            entry.copyright,
        ],
    )
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn entry_from_row(row: &Row) -> rusqlite::Result<ApodEntry> {
    let date_text: String = row.get(0)?;
    let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(ApodEntry {
        date,
        title: row.get(1)?,
        explanation: row.get(2)?,
        media_type: row.get(3)?,
        url: row.get(4)?,
        hdurl: row.get(5)?,
        thumbnail_url: row.get(6)?,
        service_version: row.get(7)?,
        copyright: row.get(8)?,
        fetched_at: row
            .get::<_, String>(9)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}
