use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apod::{normalize_entry, ApodClient, DateRange, RangeRequest};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::NewApodEntry;

/// What to do when a single entry cannot be normalized or stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BatchPolicy {
    /// Log and skip the entry; keep going with the rest.
    #[default]
    Continue,
    /// Stop at the first bad entry and write nothing from this batch.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// The entry's date, when it had a readable one.
    pub date: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub fetched: usize,
    pub stored: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}: fetched {}, stored {}, skipped {}",
            self.start,
            self.end,
            self.fetched,
            self.stored,
            self.skipped.len()
        )
    }
}

pub struct Pipeline {
    client: ApodClient,
    repository: Repository,
    policy: BatchPolicy,
}

impl Pipeline {
    pub fn new(client: ApodClient, repository: Repository, policy: BatchPolicy) -> Self {
        Self {
            client,
            repository,
            policy,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Resolve the range against `today`, fetch it, and upsert every entry.
    pub async fn run(&self, request: &RangeRequest, today: NaiveDate) -> Result<RunSummary> {
        let range = request.resolve(today)?;
        tracing::info!(
            "Fetching APOD entries from {} to {} ({} days)",
            range.start(),
            range.end(),
            range.len()
        );

        let raw = self.client.fetch_range(&range).await?;
        let summary = match self.policy {
            BatchPolicy::Continue => self.store_lenient(&range, raw).await?,
            BatchPolicy::Abort => self.store_strict(&range, raw).await?,
        };

        if summary.stored == 0 && !summary.skipped.is_empty() {
            return Err(AppError::NothingStored {
                skipped: summary.skipped.len(),
            });
        }

        tracing::info!("{}", summary);
        Ok(summary)
    }

    async fn store_lenient(&self, range: &DateRange, raw: Vec<Value>) -> Result<RunSummary> {
        let mut summary = empty_summary(range, raw.len());

        let mut seen = HashSet::new();
        let mut stored = HashSet::new();
        for value in &raw {
            let entry = match normalize_entry(value) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping entry: {}", e);
                    summary.skipped.push(skipped(raw_date(value), &e));
                    continue;
                }
            };

            let date = entry.date;
            seen.insert(date);
            match self.repository.upsert_entry(entry).await {
                Ok(()) => {
                    stored.insert(date);
                }
                Err(e @ AppError::StoreWrite { .. }) => {
                    tracing::warn!("Skipping entry: {}", e);
                    summary.skipped.push(skipped(Some(date.to_string()), &e));
                }
                Err(e) => return Err(e),
            }
        }

        // A date repeated in one response is still a single row.
        summary.stored = stored.len();
        log_missing_dates(range, &seen);
        Ok(summary)
    }

    async fn store_strict(&self, range: &DateRange, raw: Vec<Value>) -> Result<RunSummary> {
        let mut summary = empty_summary(range, raw.len());

        let entries = raw
            .iter()
            .map(normalize_entry)
            .collect::<Result<Vec<NewApodEntry>>>()?;
        log_missing_dates(range, &entries.iter().map(|e| e.date).collect());
        summary.stored = self.repository.upsert_entries_atomic(entries).await?;

        Ok(summary)
    }
}

fn empty_summary(range: &DateRange, fetched: usize) -> RunSummary {
    RunSummary {
        start: range.start(),
        end: range.end(),
        fetched,
        stored: 0,
        skipped: Vec::new(),
    }
}

/// The API silently leaves out days it has no picture for.
fn log_missing_dates(range: &DateRange, seen: &HashSet<NaiveDate>) {
    for date in range.dates().into_iter().filter(|d| !seen.contains(d)) {
        tracing::debug!("No entry returned for {}", date);
    }
}

fn skipped(date: Option<String>, err: &AppError) -> SkippedEntry {
    SkippedEntry {
        date,
        reason: err.to_string(),
    }
}

fn raw_date(value: &Value) -> Option<String> {
    value.get("date").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::apod::RetryPolicy;
    use crate::models::EntryFilter;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn first_three_days() -> RangeRequest {
        RangeRequest {
            start: Some(d(1)),
            end: Some(d(3)),
            days: 30,
        }
    }

    fn image(day: u32) -> Value {
        json!({
            "date": d(day).to_string(),
            "title": format!("Picture {}", day),
            "explanation": "Stars.",
            "media_type": "image",
            "url": format!("https://apod.nasa.gov/apod/image/2401/{}.jpg", day),
            "service_version": "v1"
        })
    }

    async fn setup(server: &MockServer, policy: BatchPolicy) -> (TempDir, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path().join("apod.db").to_str().unwrap())
            .await
            .unwrap();
        let client = ApodClient::new(
            &server.uri(),
            "TEST_KEY".to_string(),
            RetryPolicy {
                max_retries: 2,
                retry_wait: Duration::ZERO,
                backoff_multiplier: 1.0,
                max_wait: Duration::ZERO,
                request_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();
        (dir, Pipeline::new(client, repo, policy))
    }

    async fn serve(server: &MockServer, body: Value) {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn transient_failure_then_three_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        serve(&server, json!([image(1), image(2), image(3)])).await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        let summary = pipeline.run(&first_three_days(), today()).await.unwrap();

        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.stored, 3);
        assert!(summary.skipped.is_empty());

        let stored = pipeline
            .repository()
            .list_entries(&EntryFilter::default())
            .await
            .unwrap();
        assert_eq!(
            stored.iter().map(|e| e.date).collect::<Vec<_>>(),
            vec![d(1), d(2), d(3)]
        );
        assert_eq!(pipeline.repository().count_entries().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn repeated_date_counts_as_one_stored_entry() {
        let server = MockServer::start().await;
        let mut again = image(1);
        again["title"] = json!("Picture 1, corrected");
        serve(&server, json!([image(1), again, image(2)])).await;

        for policy in [BatchPolicy::Continue, BatchPolicy::Abort] {
            let (_dir, pipeline) = setup(&server, policy).await;
            let summary = pipeline.run(&first_three_days(), today()).await.unwrap();

            assert_eq!(summary.fetched, 3);
            assert_eq!(summary.stored, 2);
            assert_eq!(pipeline.repository().count_entries().await.unwrap(), 2);
            let first = pipeline.repository().get_entry(d(1)).await.unwrap().unwrap();
            assert_eq!(first.title, "Picture 1, corrected");
        }
    }

    #[tokio::test]
    async fn entry_missing_date_is_skipped() {
        let server = MockServer::start().await;
        serve(
            &server,
            json!([image(1), {"title": "No date", "media_type": "image"}]),
        )
        .await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        let summary = pipeline.run(&first_three_days(), today()).await.unwrap();

        assert_eq!(summary.stored, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.skipped[0].date.is_none());
        assert_eq!(pipeline.repository().count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entry_missing_title_never_reaches_storage() {
        let server = MockServer::start().await;
        serve(
            &server,
            json!([image(1), {"date": "2024-01-02", "media_type": "image"}]),
        )
        .await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        let summary = pipeline.run(&first_three_days(), today()).await.unwrap();

        assert_eq!(summary.skipped[0].date.as_deref(), Some("2024-01-02"));
        assert!(pipeline.repository().get_entry(d(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rerun_leaves_same_state() {
        let server = MockServer::start().await;
        serve(&server, json!([image(1), image(2), image(3)])).await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        pipeline.run(&first_three_days(), today()).await.unwrap();
        let first: Vec<NewApodEntry> = pipeline
            .repository()
            .list_entries(&EntryFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.into_new())
            .collect();

        pipeline.run(&first_three_days(), today()).await.unwrap();
        let second: Vec<NewApodEntry> = pipeline
            .repository()
            .list_entries(&EntryFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.into_new())
            .collect();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn all_entries_skipped_fails_the_run() {
        let server = MockServer::start().await;
        serve(&server, json!([{"title": "No date"}, {"date": "2024-01-02"}])).await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        let err = pipeline.run(&first_three_days(), today()).await.unwrap_err();
        assert!(matches!(err, AppError::NothingStored { skipped: 2 }));
    }

    #[tokio::test]
    async fn empty_response_is_an_empty_run() {
        let server = MockServer::start().await;
        serve(&server, json!([])).await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        let summary = pipeline.run(&first_three_days(), today()).await.unwrap();
        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.stored, 0);
    }

    #[tokio::test]
    async fn abort_policy_writes_nothing_on_malformed_entry() {
        let server = MockServer::start().await;
        serve(&server, json!([image(1), {"title": "No date"}, image(3)])).await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Abort).await;
        let err = pipeline.run(&first_three_days(), today()).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedEntry(_)));
        assert_eq!(pipeline.repository().count_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn abort_policy_stores_clean_batch() {
        let server = MockServer::start().await;
        serve(&server, json!([image(1), image(2), image(3)])).await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Abort).await;
        let summary = pipeline.run(&first_three_days(), today()).await.unwrap();
        assert_eq!(summary.stored, 3);
        assert!(summary.skipped.is_empty());
    }

    #[tokio::test]
    async fn invalid_range_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        let request = RangeRequest {
            start: Some(d(5)),
            end: Some(d(1)),
            days: 30,
        };
        let err = pipeline.run(&request, today()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn auth_failure_aborts_without_writes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, pipeline) = setup(&server, BatchPolicy::Continue).await;
        let err = pipeline.run(&first_three_days(), today()).await.unwrap_err();
        assert!(matches!(err, AppError::Auth { status: 403, .. }));
        assert_eq!(pipeline.repository().count_entries().await.unwrap(), 0);
    }

    #[test]
    fn summary_display() {
        let summary = RunSummary {
            start: d(1),
            end: d(3),
            fetched: 2,
            stored: 1,
            skipped: vec![SkippedEntry {
                date: None,
                reason: "Malformed entry: entry is missing 'date'".to_string(),
            }],
        };
        assert_eq!(
            summary.to_string(),
            "2024-01-01..2024-01-03: fetched 2, stored 1, skipped 1"
        );
    }
}
