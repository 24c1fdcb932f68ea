//! External vehicle source contract and its implementations.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use vehisync_storage::{FetchError, HttpFetcher};

use crate::mapper::{modified_at, raw_slug};
use crate::raw::{RawVehicle, VehiclePage};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed response from {context}: {source}")]
    Malformed {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid source url: {0}")]
    InvalidUrl(String),
    #[error("fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },
    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait VehicleSource: Send + Sync {
    fn name(&self) -> &str;

    /// One page of the listing, 1-based. `since` limits it to records modified
    /// after that instant.
    async fn fetch_page(
        &self,
        page: u32,
        per_page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<VehiclePage, SourceError>;

    /// `Ok(None)` when the platform does not know the slug.
    async fn fetch_one(&self, slug: &str) -> Result<Option<RawVehicle>, SourceError>;

    /// Send a local record upstream and return the platform's id for it.
    async fn push_vehicle(&self, payload: &JsonValue) -> Result<String, SourceError>;
}

/// Pages arrive either as `{items,total,pages}` or as a bare array.
pub fn parse_page_body(body: &[u8], context: &str) -> Result<VehiclePage, SourceError> {
    let value: JsonValue = serde_json::from_slice(body).map_err(|source| SourceError::Malformed {
        context: context.to_string(),
        source,
    })?;
    let mut page = match value {
        JsonValue::Array(items) => {
            let items: Vec<RawVehicle> = items.into_iter().map(RawVehicle::from).collect();
            VehiclePage {
                total: items.len() as u64,
                pages: 0,
                items,
                raw_body: None,
            }
        }
        other => serde_json::from_value(other).map_err(|source| SourceError::Malformed {
            context: context.to_string(),
            source,
        })?,
    };
    page.raw_body = Some(body.to_vec());
    Ok(page)
}

fn paginate(items: Vec<RawVehicle>, page: u32, per_page: u32) -> VehiclePage {
    let per_page = per_page.max(1) as usize;
    let total = items.len();
    let pages = total.div_ceil(per_page) as u32;
    let start = (page.max(1) as usize - 1) * per_page;
    let mut listing = VehiclePage {
        items: items.into_iter().skip(start).take(per_page).collect(),
        total: total as u64,
        pages,
        raw_body: None,
    };
    listing.raw_body = serde_json::to_vec(&listing).ok();
    listing
}

fn modified_since(raw: &RawVehicle, since: Option<DateTime<Utc>>) -> bool {
    match (since, modified_at(raw)) {
        (None, _) => true,
        (Some(since), Some(modified)) => modified > since,
        (Some(_), None) => false,
    }
}

fn payload_slug(payload: &JsonValue) -> String {
    payload
        .get("slug")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The platform's REST API.
#[derive(Debug, Clone)]
pub struct HttpVehicleSource {
    base_url: Url,
    http: HttpFetcher,
}

impl HttpVehicleSource {
    pub fn new(base_url: &str, http: HttpFetcher) -> Result<Self, SourceError> {
        let trimmed = base_url.trim_end_matches('/');
        let base_url = Url::parse(&format!("{trimmed}/"))
            .map_err(|e| SourceError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self { base_url, http })
    }

    fn vehicles_url(&self) -> Result<Url, SourceError> {
        self.base_url
            .join("vehicles")
            .map_err(|e| SourceError::InvalidUrl(e.to_string()))
    }

    pub fn listing_url(
        &self,
        page: u32,
        per_page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Url, SourceError> {
        let mut url = self.vehicles_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &page.to_string());
            query.append_pair("per_page", &per_page.to_string());
            if let Some(since) = since {
                query.append_pair("modified_after", &since.to_rfc3339());
            }
        }
        Ok(url)
    }

    pub fn detail_url(&self, slug: &str) -> Result<Url, SourceError> {
        let mut url = self.vehicles_url()?;
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?
            .push(slug);
        Ok(url)
    }
}

#[async_trait]
impl VehicleSource for HttpVehicleSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_page(
        &self,
        page: u32,
        per_page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<VehiclePage, SourceError> {
        let url = self.listing_url(page, per_page, since)?;
        let response = self.http.get(url.as_str()).await?;
        let parsed = parse_page_body(&response.body, &response.final_url)?;
        debug!(page, items = parsed.items.len(), total = parsed.total, "fetched listing page");
        Ok(parsed)
    }

    async fn fetch_one(&self, slug: &str) -> Result<Option<RawVehicle>, SourceError> {
        let url = self.detail_url(slug)?;
        let response = match self.http.get(url.as_str()).await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value: JsonValue =
            serde_json::from_slice(&response.body).map_err(|source| SourceError::Malformed {
                context: response.final_url.clone(),
                source,
            })?;
        Ok(Some(RawVehicle::from(value)))
    }

    async fn push_vehicle(&self, payload: &JsonValue) -> Result<String, SourceError> {
        let url = self.vehicles_url()?;
        let response = self.http.post_json(url.as_str(), payload).await?;
        let value: JsonValue =
            serde_json::from_slice(&response.body).map_err(|source| SourceError::Malformed {
                context: response.final_url.clone(),
                source,
            })?;
        let id = match value.get("id") {
            Some(JsonValue::String(id)) => id.clone(),
            Some(JsonValue::Number(id)) => id.to_string(),
            _ => {
                return Err(SourceError::Unavailable(format!(
                    "push response for {} carried no id",
                    payload_slug(payload)
                )))
            }
        };
        Ok(id)
    }
}

/// Listing pages captured on disk as `page-<n>.json`.
///
/// Pages are read once, on first use. Pushes are accepted and recorded in
/// memory only.
#[derive(Debug)]
pub struct FixtureVehicleSource {
    dir: PathBuf,
    records: OnceCell<Vec<RawVehicle>>,
    pushed: Mutex<Vec<JsonValue>>,
}

impl FixtureVehicleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            records: OnceCell::new(),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn page_path(&self, page: u32) -> PathBuf {
        self.dir.join(format!("page-{page}.json"))
    }

    async fn read_page(&self, page: u32) -> Result<Option<VehiclePage>, SourceError> {
        let path = self.page_path(page);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SourceError::Fixture {
                    path,
                    message: err.to_string(),
                })
            }
        };
        parse_page_body(&body, &path.display().to_string()).map(Some)
    }

    /// Every fixture record, in page order.
    pub async fn load_all(&self) -> Result<&[RawVehicle], SourceError> {
        let records = self
            .records
            .get_or_try_init(|| async {
                let mut all = Vec::new();
                let mut page = 1;
                while let Some(parsed) = self.read_page(page).await? {
                    all.extend(parsed.items);
                    page += 1;
                }
                debug!(dir = %self.dir.display(), records = all.len(), "loaded fixture pages");
                Ok::<_, SourceError>(all)
            })
            .await?;
        Ok(records)
    }

    pub fn pushed(&self) -> Vec<JsonValue> {
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VehicleSource for FixtureVehicleSource {
    fn name(&self) -> &str {
        "fixtures"
    }

    async fn fetch_page(
        &self,
        page: u32,
        per_page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<VehiclePage, SourceError> {
        let items = self
            .load_all()
            .await?
            .iter()
            .filter(|raw| modified_since(raw, since))
            .cloned()
            .collect();
        Ok(paginate(items, page, per_page))
    }

    async fn fetch_one(&self, slug: &str) -> Result<Option<RawVehicle>, SourceError> {
        Ok(self
            .load_all()
            .await?
            .iter()
            .find(|raw| raw_slug(raw).as_deref() == Some(slug))
            .cloned())
    }

    async fn push_vehicle(&self, payload: &JsonValue) -> Result<String, SourceError> {
        let slug = payload_slug(payload);
        info!(slug, dir = %self.dir.display(), "fixture source accepted push");
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());
        Ok(format!("fixture-{slug}"))
    }
}

/// In-process source for tests and bootstrapping.
#[derive(Debug, Default)]
pub struct MemoryVehicleSource {
    vehicles: Mutex<Vec<RawVehicle>>,
    failing_pages: Mutex<HashSet<u32>>,
    rejected_pushes: Mutex<HashSet<String>>,
    pushed: Mutex<Vec<JsonValue>>,
}

impl MemoryVehicleSource {
    pub fn new(vehicles: Vec<RawVehicle>) -> Self {
        Self {
            vehicles: Mutex::new(vehicles),
            ..Default::default()
        }
    }

    pub fn set_vehicles(&self, vehicles: Vec<RawVehicle>) {
        *self.vehicles.lock().unwrap_or_else(PoisonError::into_inner) = vehicles;
    }

    /// Make `fetch_page(page, ..)` fail with an unavailable error.
    pub fn fail_page(&self, page: u32) {
        self.failing_pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page);
    }

    pub fn reject_push(&self, slug: impl Into<String>) {
        self.rejected_pushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slug.into());
    }

    pub fn pushed(&self) -> Vec<JsonValue> {
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn snapshot(&self) -> Vec<RawVehicle> {
        self.vehicles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VehicleSource for MemoryVehicleSource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_page(
        &self,
        page: u32,
        per_page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<VehiclePage, SourceError> {
        if self
            .failing_pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&page)
        {
            return Err(SourceError::Unavailable(format!("page {page} unavailable")));
        }
        let items = self
            .snapshot()
            .into_iter()
            .filter(|raw| modified_since(raw, since))
            .collect();
        Ok(paginate(items, page, per_page))
    }

    async fn fetch_one(&self, slug: &str) -> Result<Option<RawVehicle>, SourceError> {
        Ok(self
            .snapshot()
            .into_iter()
            .find(|raw| raw_slug(raw).as_deref() == Some(slug)))
    }

    async fn push_vehicle(&self, payload: &JsonValue) -> Result<String, SourceError> {
        let slug = payload_slug(payload);
        if self
            .rejected_pushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&slug)
        {
            return Err(SourceError::Unavailable(format!("push rejected for {slug}")));
        }
        let mut pushed = self.pushed.lock().unwrap_or_else(PoisonError::into_inner);
        pushed.push(payload.clone());
        Ok(format!("mem-{}", pushed.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use chrono::TimeZone;
    use serde_json::json;
    use vehisync_storage::HttpClientConfig;

    fn vehicle(slug: &str, modified: &str) -> RawVehicle {
        json!({ "slug": slug, "data-modificacio": modified }).into()
    }

    #[test]
    fn page_bodies_accept_envelope_or_bare_array() {
        let envelope = br#"{"items":[{"slug":"a"},{"slug":"b"}],"total":7,"pages":4}"#;
        let page = parse_page_body(envelope, "test").unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 7);
        assert_eq!(page.pages, 4);
        assert_eq!(page.raw_body.as_deref(), Some(&envelope[..]));

        let bare = parse_page_body(br#"[{"slug":"a"}]"#, "test").unwrap();
        assert_eq!(bare.items.len(), 1);
        assert_eq!(bare.total, 1);

        assert!(matches!(
            parse_page_body(b"<html>", "test"),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn http_source_builds_listing_and_detail_urls() {
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let source = HttpVehicleSource::new("https://motor.test/wp-json/api/v1/", http).unwrap();
        let since = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let listing = source.listing_url(2, 50, Some(since)).unwrap();
        assert_eq!(listing.path(), "/wp-json/api/v1/vehicles");
        let query = listing.query().unwrap_or_default().to_string();
        assert!(query.contains("page=2"));
        assert!(query.contains("per_page=50"));
        assert!(query.contains("modified_after=2026-01-02T03%3A04%3A05%2B00%3A00"));

        let detail = source.detail_url("bmw-320d").unwrap();
        assert_eq!(detail.as_str(), "https://motor.test/wp-json/api/v1/vehicles/bmw-320d");
    }

    #[tokio::test]
    async fn memory_source_paginates_and_filters_by_modification() {
        let source = MemoryVehicleSource::new(vec![
            vehicle("a", "2026-01-01T00:00:00Z"),
            vehicle("b", "2026-03-01T00:00:00Z"),
            vehicle("c", "2026-03-02T00:00:00Z"),
        ]);

        let first = source.fetch_page(1, 2, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.pages, 2);
        assert_eq!(first.total, 3);
        let second = source.fetch_page(2, 2, None).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(source.fetch_page(3, 2, None).await.unwrap().items.is_empty());

        let since = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let recent = source.fetch_page(1, 50, Some(since)).await.unwrap();
        assert_eq!(recent.total, 2);

        assert!(source.fetch_one("c").await.unwrap().is_some());
        assert!(source.fetch_one("zzz").await.unwrap().is_none());

        source.fail_page(1);
        assert!(source.fetch_page(1, 2, None).await.is_err());
    }

    #[tokio::test]
    async fn fixture_source_reads_numbered_pages() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("page-1.json"),
            r#"{"items":[{"slug":"seat-ibiza"},{"slug":"kia-niro"}],"total":3,"pages":2}"#,
        )
        .unwrap();
        fs::write(dir.path().join("page-2.json"), r#"[{"slug":"honda-cbr"}]"#).unwrap();

        let source = FixtureVehicleSource::new(dir.path());
        assert_eq!(source.load_all().await.unwrap().len(), 3);

        // later edits are not picked up once pages are loaded
        fs::write(dir.path().join("page-3.json"), r#"[{"slug":"vespa-gts"}]"#).unwrap();
        assert_eq!(source.load_all().await.unwrap().len(), 3);

        let page = source.fetch_page(1, 50, None).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(source.fetch_one("honda-cbr").await.unwrap().is_some());

        let id = source.push_vehicle(&json!({"slug": "kia-niro"})).await.unwrap();
        assert_eq!(id, "fixture-kia-niro");
        assert_eq!(source.pushed().len(), 1);
    }

    #[tokio::test]
    async fn memory_source_records_and_rejects_pushes() {
        let source = MemoryVehicleSource::default();
        source.reject_push("bad");
        assert_eq!(source.push_vehicle(&json!({"slug": "ok"})).await.unwrap(), "mem-1");
        assert!(source.push_vehicle(&json!({"slug": "bad"})).await.is_err());
        assert_eq!(source.pushed().len(), 1);
    }
}
