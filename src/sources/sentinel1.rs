//! Sentinel-1 product search and download through the Copernicus Data Space
//! Ecosystem (CDSE): OpenSearch catalogue, OIDC token service, OData zipper.

use crate::adapters::geojson::read_total_bounds;
use crate::adapters::http::{get_with_bearer, send_with_retry, RetryPolicy};
use crate::domain::model::{
    format_query_date, BoundingBox, DateRange, OrbitDirection, Product, ProductType, SensorMode,
};
use crate::utils::error::{AnalyticsError, Result};
use crate::utils::validation::validate_date_range;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const SEARCH_URL: &str =
    "https://catalogue.dataspace.copernicus.eu/resto/api/collections/Sentinel1/search.json";
pub const TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";
pub const DOWNLOAD_URL: &str = "https://zipper.dataspace.copernicus.eu/odata/v1/Products";
const CLIENT_ID: &str = "cdse-public";
const DEFAULT_MAX_RECORDS: usize = 50;
const MAX_PAGES: usize = 100;
const LOGGED_PRODUCTS: usize = 5;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub search_url: String,
    pub token_url: String,
    /// OData products root; `({id})/$value` is appended per product.
    pub download_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            search_url: SEARCH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            download_url: DOWNLOAD_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct Sentinel1Query {
    credentials: Credentials,
    output_dir: PathBuf,
    range: DateRange,
    product_type: ProductType,
    orbit_direction: Option<OrbitDirection>,
    sensor_mode: SensorMode,
    endpoints: Endpoints,
    max_records: usize,
    concurrent_downloads: usize,
    retry: RetryPolicy,
    client: Client,
    download_client: Client,
}

impl Sentinel1Query {
    /// Creates the output directory if needed.
    pub fn new(
        credentials: Credentials,
        output_dir: impl Into<PathBuf>,
        range: DateRange,
    ) -> Result<Self> {
        validate_date_range("sentinel1.dates", &range)?;

        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;

        let download_client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            credentials,
            output_dir,
            range,
            product_type: ProductType::default(),
            orbit_direction: None,
            sensor_mode: SensorMode::default(),
            endpoints: Endpoints::default(),
            max_records: DEFAULT_MAX_RECORDS,
            concurrent_downloads: 2,
            retry: RetryPolicy::default(),
            client: Client::new(),
            download_client,
        })
    }

    pub fn with_product_type(mut self, product_type: ProductType) -> Self {
        self.product_type = product_type;
        self
    }

    pub fn with_orbit_direction(mut self, orbit_direction: Option<OrbitDirection>) -> Self {
        self.orbit_direction = orbit_direction;
        self
    }

    pub fn with_sensor_mode(mut self, sensor_mode: SensorMode) -> Self {
        self.sensor_mode = sensor_mode;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn with_concurrent_downloads(mut self, concurrent_downloads: usize) -> Self {
        self.concurrent_downloads = concurrent_downloads.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// OpenSearch parameters for `bbox`.
    pub fn search_terms(&self, bbox: &BoundingBox) -> Vec<(&'static str, String)> {
        let mut terms = vec![
            ("box", bbox.to_query_string()),
            ("startDate", format_query_date(&self.range.start)),
            ("completionDate", format_query_date(&self.range.end)),
            ("productType", self.product_type.to_string()),
            ("sensorMode", self.sensor_mode.to_string()),
            ("maxRecords", self.max_records.to_string()),
        ];
        if let Some(direction) = self.orbit_direction {
            terms.push(("orbitDirection", direction.to_string()));
        }
        terms
    }

    pub async fn query_by_geojson<P: AsRef<Path>>(&self, geojson_path: P) -> Result<Vec<Product>> {
        let bounds = read_total_bounds(geojson_path)?;
        tracing::info!("Querying Sentinel-1 for bbox: {}", bounds);
        self.query(&bounds).await
    }

    pub async fn query(&self, bbox: &BoundingBox) -> Result<Vec<Product>> {
        let first = Url::parse_with_params(&self.endpoints.search_url, self.search_terms(bbox))
            .map_err(|e| AnalyticsError::InvalidConfigValueError {
                field: "sentinel1.search_url".to_string(),
                value: self.endpoints.search_url.clone(),
                reason: e.to_string(),
            })?;

        let mut products = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(page_url) = next.take() {
            tracing::debug!("Fetching catalogue page {}", page_url);
            let response = send_with_retry(self.client.get(page_url), &self.retry).await?;
            let body: Value = response.json().await?;

            let features = body
                .get("features")
                .and_then(|f| f.as_array())
                .map(|f| f.as_slice())
                .unwrap_or(&[]);
            if features.is_empty() {
                break;
            }
            let before = products.len();
            products.extend(features.iter().filter_map(Product::from_feature));
            let skipped = features.len() - (products.len() - before);
            if skipped > 0 {
                tracing::debug!("Skipped {} catalogue features without an id", skipped);
            }

            pages += 1;
            if pages >= MAX_PAGES {
                tracing::warn!("Stopping after {} catalogue pages", MAX_PAGES);
                break;
            }
            next = next_page(&body);
        }

        log_products(&products);
        Ok(products)
    }

    /// OIDC password grant against the CDSE identity service.
    pub async fn access_token(&self) -> Result<String> {
        let form = [
            ("grant_type", "password"),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("client_id", CLIENT_ID),
        ];
        let request = self.client.post(&self.endpoints.token_url).form(&form);

        let response = match send_with_retry(request, &self.retry).await {
            Ok(response) => response,
            Err(AnalyticsError::ApiStatusError { status, .. }) if (400..500).contains(&status) => {
                return Err(AnalyticsError::AuthError {
                    message: format!(
                        "token request for '{}' rejected with status {}",
                        self.credentials.username, status
                    ),
                })
            }
            Err(e) => return Err(e),
        };

        let token: TokenResponse = response.json().await.map_err(|e| AnalyticsError::AuthError {
            message: format!("unexpected token response: {}", e),
        })?;
        Ok(token.access_token)
    }

    fn download_url_for(&self, product: &Product) -> String {
        product.download_url.clone().unwrap_or_else(|| {
            format!(
                "{}({})/$value",
                self.endpoints.download_url.trim_end_matches('/'),
                product.id
            )
        })
    }

    /// Downloads every product to `<output_dir>/<title>.zip`.
    ///
    /// Existing archives are kept. Individual failures are logged and
    /// skipped; the call fails only when nothing could be retrieved.
    pub async fn download(&self, products: &[Product]) -> Result<Vec<(Product, PathBuf)>> {
        if products.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(
            "Starting download of {} products to {}",
            products.len(),
            self.output_dir.display()
        );

        let token = Arc::new(self.access_token().await?);
        let permits = Arc::new(Semaphore::new(self.concurrent_downloads));
        let mut tasks = JoinSet::new();

        for (index, product) in products.iter().cloned().enumerate() {
            let client = self.download_client.clone();
            let url = self.download_url_for(&product);
            let target = self.output_dir.join(product.file_name());
            let token = Arc::clone(&token);
            let permits = Arc::clone(&permits);
            let retry = self.retry;

            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => download_product(&client, &url, &token, &target, &retry).await,
                    Err(e) => Err(AnalyticsError::processing(e.to_string())),
                };
                (index, product, outcome)
            });
        }

        let mut downloaded = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, product, outcome) = joined
                .map_err(|e| AnalyticsError::processing(format!("download task failed: {}", e)))?;
            match outcome {
                Ok(path) => downloaded.push((index, product, path)),
                Err(e) => {
                    tracing::error!("Failed to download {}: {}", product.title, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if downloaded.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        downloaded.sort_by_key(|(index, _, _)| *index);
        tracing::info!(
            "Download complete. {} of {} files saved to {}",
            downloaded.len(),
            products.len(),
            self.output_dir.display()
        );
        Ok(downloaded
            .into_iter()
            .map(|(_, product, path)| (product, path))
            .collect())
    }
}

async fn download_product(
    client: &Client,
    url: &str,
    token: &str,
    target: &Path,
    retry: &RetryPolicy,
) -> Result<PathBuf> {
    if tokio::fs::try_exists(target).await? {
        tracing::info!("Skipping {}, already downloaded", target.display());
        return Ok(target.to_path_buf());
    }

    let response = get_with_bearer(client, url, token, retry).await?;

    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let written = match write_body(response, &partial, target).await {
        Ok(written) => written,
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                tracing::debug!("Could not remove {}: {}", partial.display(), cleanup);
            }
            return Err(e);
        }
    };
    tracing::info!("Downloaded {} ({} bytes)", target.display(), written);
    Ok(target.to_path_buf())
}

/// Streams the body into `partial`, then moves it to `target`.
async fn write_body(mut response: Response, partial: &Path, target: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(partial, target).await?;
    Ok(written)
}

fn next_page(body: &Value) -> Option<Url> {
    body.pointer("/properties/links")
        .and_then(|l| l.as_array())?
        .iter()
        .find(|link| link.get("rel").and_then(|r| r.as_str()) == Some("next"))
        .and_then(|link| link.get("href").and_then(|h| h.as_str()))
        .and_then(|href| Url::parse(href).ok())
}

fn log_products(products: &[Product]) {
    tracing::info!("Found {} Sentinel-1 products", products.len());

    for (i, product) in products.iter().take(LOGGED_PRODUCTS).enumerate() {
        tracing::info!(
            "  [{}] {} | ID: {} | Date: {} | Orbit: {} | Pol: {}",
            i + 1,
            product.title,
            product.id,
            product.start_date.as_deref().unwrap_or("Unknown"),
            product.orbit_direction.as_deref().unwrap_or("Unknown"),
            product.polarisation.as_deref().unwrap_or("Unknown")
        );
    }

    if products.len() > LOGGED_PRODUCTS {
        tracing::info!("  ... and {} more products", products.len() - LOGGED_PRODUCTS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::parse_date;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn range() -> DateRange {
        DateRange::new(
            parse_date("2022-06-19").unwrap(),
            parse_date("2022-06-25").unwrap(),
        )
    }

    fn feature(id: &str) -> Value {
        json!({
            "type": "Feature",
            "id": id,
            "properties": {
                "title": format!("S1A_IW_GRDH_{}.SAFE", id),
                "startDate": "2022-06-20T22:59:26.000Z",
                "orbitDirection": "DESCENDING",
                "polarisation": "VV&VH"
            }
        })
    }

    fn endpoints(server: &MockServer) -> Endpoints {
        Endpoints {
            search_url: server.url("/search.json"),
            token_url: server.url("/token"),
            download_url: server.url("/odata/v1/Products"),
        }
    }

    fn query(server: &MockServer, dir: &TempDir) -> Sentinel1Query {
        Sentinel1Query::new(Credentials::new("user@example.com", "pw"), dir.path(), range())
            .unwrap()
            .with_endpoints(endpoints(server))
            .with_retry_policy(RetryPolicy {
                attempts: 2,
                delay: Duration::from_millis(10),
            })
    }

    fn products(ids: &[&str]) -> Vec<Product> {
        ids.iter()
            .map(|id| Product::from_feature(&feature(id)).unwrap())
            .collect()
    }

    fn partial_files(dir: &TempDir) -> Vec<PathBuf> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "part"))
            .collect()
    }

    /// Answers every request with `response` after `delay` and records the
    /// peak number of requests being served at once. Returns the OData root.
    async fn counting_server(response: &'static [u8], delay: Duration) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&peak);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}/odata/v1/Products", addr), peak)
    }

    fn token_mock(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({"access_token": "tok"}));
        });
    }

    #[test]
    fn test_search_terms() {
        let dir = TempDir::new().unwrap();
        let query = Sentinel1Query::new(Credentials::new("u", "p"), dir.path(), range())
            .unwrap()
            .with_orbit_direction(Some(OrbitDirection::Ascending));

        let terms = query.search_terms(&BoundingBox::new(-120.5, 38.0, -120.0, 38.5));
        let lookup = |key: &str| terms.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str());

        assert_eq!(lookup("box"), Some("-120.5,38,-120,38.5"));
        assert_eq!(lookup("startDate"), Some("2022-06-19T00:00:00Z"));
        assert_eq!(lookup("completionDate"), Some("2022-06-25T00:00:00Z"));
        assert_eq!(lookup("productType"), Some("GRD"));
        assert_eq!(lookup("sensorMode"), Some("IW"));
        assert_eq!(lookup("orbitDirection"), Some("ASCENDING"));
    }

    #[test]
    fn test_new_rejects_inverted_dates() {
        let dir = TempDir::new().unwrap();
        let inverted = DateRange::new(range().end, range().start);
        assert!(Sentinel1Query::new(Credentials::new("u", "p"), dir.path(), inverted).is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("user", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_query_follows_next_links() {
        let server = MockServer::start();
        let next_href = server.url("/search.json?page=2");

        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/search.json")
                .query_param("productType", "GRD")
                .query_param("sensorMode", "IW")
                .query_param_exists("box");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [feature("a"), feature("b")],
                "properties": {"links": [{"rel": "next", "href": next_href}]}
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param("page", "2");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [feature("c")],
                "properties": {"links": []}
            }));
        });

        let dir = TempDir::new().unwrap();
        let products = query(&server, &dir)
            .query(&BoundingBox::new(-120.5, 38.0, -120.0, 38.5))
            .await
            .unwrap();

        first.assert();
        second.assert();
        let ids: Vec<&str> = products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_query_stops_on_empty_page() {
        let server = MockServer::start();
        let page_two = server.url("/search.json?page=2");
        let page_three = server.url("/search.json?page=3");

        server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param_exists("box");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [feature("a")],
                "properties": {"links": [{"rel": "next", "href": page_two}]}
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param("page", "2");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [],
                "properties": {"links": [{"rel": "next", "href": page_three}]}
            }));
        });
        let third = server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param("page", "3");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [feature("z")]
            }));
        });

        let dir = TempDir::new().unwrap();
        let products = query(&server, &dir)
            .query(&BoundingBox::new(-120.5, 38.0, -120.0, 38.5))
            .await
            .unwrap();

        second.assert();
        third.assert_hits(0);
        let ids: Vec<&str> = products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_query_skips_features_without_id() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search.json");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [
                    feature("a"),
                    {"type": "Feature", "properties": {"title": "S1A_NO_ID.SAFE"}},
                    feature("b")
                ]
            }));
        });

        let dir = TempDir::new().unwrap();
        let products = query(&server, &dir)
            .query(&BoundingBox::new(-120.5, 38.0, -120.0, 38.5))
            .await
            .unwrap();

        let ids: Vec<&str> = products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_query_by_geojson_uses_total_bounds() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/search.json")
                .query_param("box", "-120.5,38,-120,38.5");
            then.status(200)
                .json_body(json!({"type": "FeatureCollection", "features": []}));
        });

        let dir = TempDir::new().unwrap();
        let geojson = dir.path().join("fire.geojson");
        std::fs::write(
            &geojson,
            json!({
                "type": "Feature",
                "properties": {},
                "geometry": {"type": "Polygon", "coordinates": [[
                    [-120.5, 38.0], [-120.0, 38.0], [-120.0, 38.5], [-120.5, 38.0]
                ]]}
            })
            .to_string(),
        )
        .unwrap();

        let products = query(&server, &dir).query_by_geojson(&geojson).await.unwrap();
        mock.assert();
        assert!(products.is_empty());
    }

    #[tokio::test]
    async fn test_access_token_rejection_is_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(401).json_body(json!({"error": "invalid_grant"}));
        });

        let dir = TempDir::new().unwrap();
        let err = query(&server, &dir).access_token().await.unwrap_err();
        assert!(matches!(err, AnalyticsError::AuthError { .. }));
    }

    #[tokio::test]
    async fn test_download_writes_archives_and_skips_existing() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_contains("grant_type=password")
                .body_contains("client_id=cdse-public");
            then.status(200)
                .json_body(json!({"access_token": "tok", "expires_in": 600}));
        });
        let fetch = server.mock(|when, then| {
            when.method(GET)
                .path("/odata/v1/Products(a)/$value")
                .header("Authorization", "Bearer tok");
            then.status(200).body("archive-a");
        });

        let dir = TempDir::new().unwrap();
        let query = query(&server, &dir);
        let a = Product::from_feature(&feature("a")).unwrap();
        let b = Product::from_feature(&feature("b")).unwrap();
        std::fs::write(dir.path().join(b.file_name()), "already here").unwrap();

        let downloaded = query.download(&[a.clone(), b.clone()]).await.unwrap();

        token.assert();
        fetch.assert();
        assert_eq!(downloaded.len(), 2);
        assert_eq!(downloaded[0].0.id, "a");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(a.file_name())).unwrap(),
            "archive-a"
        );
        assert_eq!(
            std::fs::read_to_string(&downloaded[1].1).unwrap(),
            "already here"
        );
        assert!(partial_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_download_keeps_transfers_within_limit() {
        let server = MockServer::start();
        token_mock(&server);
        let (download_url, peak) = counting_server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\narchive",
            Duration::from_millis(100),
        )
        .await;

        let dir = TempDir::new().unwrap();
        let query = query(&server, &dir)
            .with_endpoints(Endpoints {
                download_url,
                ..endpoints(&server)
            })
            .with_concurrent_downloads(2);

        let downloaded = query
            .download(&products(&["a", "b", "c", "d", "e"]))
            .await
            .unwrap();

        assert_eq!(downloaded.len(), 5);
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "{} downloads ran at once", peak);
        for (_, path) in &downloaded {
            assert_eq!(std::fs::read_to_string(path).unwrap(), "archive");
        }
        assert!(partial_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_download_removes_partial_file() {
        let server = MockServer::start();
        token_mock(&server);
        // promises 100 bytes, sends 7, then closes
        let (download_url, _) = counting_server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\narchive",
            Duration::ZERO,
        )
        .await;

        let dir = TempDir::new().unwrap();
        let query = query(&server, &dir).with_endpoints(Endpoints {
            download_url,
            ..endpoints(&server)
        });
        let a = products(&["a"]).remove(0);

        assert!(query.download(&[a.clone()]).await.is_err());
        assert!(!dir.path().join(a.file_name()).exists());
        assert!(partial_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_download_fails_when_nothing_retrieved() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({"access_token": "tok"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/odata/v1/Products(a)/$value");
            then.status(404);
        });

        let dir = TempDir::new().unwrap();
        let a = Product::from_feature(&feature("a")).unwrap();
        let err = query(&server, &dir).download(&[a]).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::ApiStatusError { status: 404, .. }));
    }
}
