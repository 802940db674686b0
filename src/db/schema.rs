pub const SCHEMA: &str = r#"
-- apod_entries table (one row per calendar date, last write wins)
CREATE TABLE IF NOT EXISTS apod_entries (
    date TEXT PRIMARY KEY
        CHECK (date GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'),
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    explanation TEXT,
    media_type TEXT,
    url TEXT,
    hdurl TEXT,
    thumbnail_url TEXT,
    service_version TEXT,
    copyright TEXT,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_apod_media_type ON apod_entries(media_type);
"#;
