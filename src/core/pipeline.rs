use crate::config::RunConfig;
use crate::core::{Pipeline, Storage};
use crate::domain::model::{
    BoundingBox, DateRange, ExtractResult, ProcessedScene, Product, TransformResult,
};
use crate::preprocess::{PreprocessOptions, Sentinel1Preprocessor};
use crate::raster::geotiff;
use crate::sources::{GediClient, Sentinel1Query};
use crate::utils::error::{AnalyticsError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "products.csv";
pub const GEDI_URLS_FILE: &str = "gedi_urls.txt";

struct GediStage {
    client: GediClient,
    range: DateRange,
    max_results: Option<usize>,
}

/// Acquires post-fire Sentinel-1 scenes over an area, preprocesses them to
/// dB backscatter GeoTIFFs and lists co-located GEDI granules.
pub struct FirePipeline<S: Storage> {
    storage: S,
    query: Sentinel1Query,
    area: BoundingBox,
    options: PreprocessOptions,
    max_products: usize,
    gedi: Option<GediStage>,
}

impl<S: Storage> FirePipeline<S> {
    pub fn new(storage: S, query: Sentinel1Query, area: BoundingBox) -> Self {
        Self {
            storage,
            query,
            area,
            options: PreprocessOptions::default(),
            max_products: 1,
            gedi: None,
        }
    }

    pub fn from_config(storage: S, config: &RunConfig) -> Result<Self> {
        let retry = config.retry_policy();
        let s1 = &config.sentinel1;

        let mut query =
            Sentinel1Query::new(config.credentials(), config.download_dir(), config.sentinel1_range()?)?
                .with_product_type(s1.product_type)
                .with_orbit_direction(s1.orbit_direction)
                .with_sensor_mode(s1.sensor_mode)
                .with_endpoints(config.endpoints())
                .with_concurrent_downloads(config.concurrent_downloads())
                .with_retry_policy(retry);
        if let Some(max_records) = s1.max_records {
            query = query.with_max_records(max_records);
        }

        let mut pipeline = Self::new(storage, query, config.area_bounds()?)
            .with_options(config.preprocess_options()?)
            .with_max_products(config.max_products());

        if let (Some(gedi), Some(range)) = (&config.gedi, config.gedi_range()?) {
            let mut client = GediClient::new(gedi.product)
                .with_endpoint(config.gedi_endpoint())
                .with_retry_policy(retry);
            if let Some(version) = &gedi.version {
                client = client.with_version(version.clone());
            }
            pipeline = pipeline.with_gedi(client, range, gedi.max_results);
        }

        Ok(pipeline)
    }

    pub fn with_options(mut self, options: PreprocessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_products(mut self, max_products: usize) -> Self {
        self.max_products = max_products.max(1);
        self
    }

    pub fn with_gedi(mut self, client: GediClient, range: DateRange, max_results: Option<usize>) -> Self {
        self.gedi = Some(GediStage {
            client,
            range,
            max_results,
        });
        self
    }

    pub fn area(&self) -> &BoundingBox {
        &self.area
    }

    fn scene_output_name(&self, product: &Product) -> String {
        format!(
            "{}_{}",
            product.scene_name(),
            self.options.polarization.as_str().to_ascii_lowercase()
        )
    }
}

/// One line of the product manifest.
#[derive(Debug, Serialize)]
struct ManifestRow<'a> {
    id: &'a str,
    title: &'a str,
    start_date: &'a str,
    orbit_direction: &'a str,
    polarisation: &'a str,
    archive: String,
    output: String,
    width: Option<usize>,
    height: Option<usize>,
    mean_db: Option<String>,
    status: String,
}

fn process_scene(
    archive: &Path,
    options: &PreprocessOptions,
    name: String,
) -> Result<ProcessedScene> {
    let preprocessor = Sentinel1Preprocessor::new(archive)?;
    let raster = preprocessor.run(options)?;
    let geotiff = geotiff::encode(&raster)?;

    Ok(ProcessedScene {
        name,
        width: raster.width,
        height: raster.height,
        mean_db: raster.mean(),
        geotiff,
    })
}

fn manifest_csv(rows: &[ManifestRow<'_>]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AnalyticsError::processing(format!("manifest flush failed: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| AnalyticsError::processing(format!("manifest is not UTF-8: {}", e)))
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for FirePipeline<S> {
    async fn extract(&self) -> Result<ExtractResult> {
        tracing::info!("Searching Sentinel-1 products over {}", self.area);
        let products = self.query.query(&self.area).await?;

        let selected: Vec<Product> = products.iter().take(self.max_products).cloned().collect();
        let downloaded = if selected.is_empty() {
            tracing::warn!("No Sentinel-1 products found, nothing to download");
            Vec::new()
        } else {
            tracing::debug!(
                "Downloading {} of {} products",
                selected.len(),
                products.len()
            );
            self.query.download(&selected).await?
        };

        let gedi_urls = match &self.gedi {
            Some(stage) => {
                stage
                    .client
                    .get_download_urls(&self.area, &stage.range, stage.max_results)
                    .await?
            }
            None => Vec::new(),
        };

        Ok(ExtractResult {
            products,
            downloaded,
            gedi_urls,
        })
    }

    async fn transform(&self, data: ExtractResult) -> Result<TransformResult> {
        let mut scenes = Vec::new();
        let mut rows = Vec::new();
        let mut first_error = None;

        for (product, archive) in &data.downloaded {
            let name = self.scene_output_name(product);
            let options = self.options.clone();
            let path = archive.clone();
            let task_name = name.clone();

            let outcome =
                tokio::task::spawn_blocking(move || process_scene(&path, &options, task_name))
                    .await
                    .map_err(|e| AnalyticsError::processing(format!("preprocess task failed: {}", e)))
                    .and_then(|result| result);

            let mut row = ManifestRow {
                id: &product.id,
                title: &product.title,
                start_date: product.start_date.as_deref().unwrap_or(""),
                orbit_direction: product.orbit_direction.as_deref().unwrap_or(""),
                polarisation: product.polarisation.as_deref().unwrap_or(""),
                archive: archive.display().to_string(),
                output: String::new(),
                width: None,
                height: None,
                mean_db: None,
                status: String::new(),
            };

            match outcome {
                Ok(scene) => {
                    tracing::info!(
                        "Preprocessed {} ({}x{})",
                        scene.name,
                        scene.width,
                        scene.height
                    );
                    row.output = format!("{}.tif", scene.name);
                    row.width = Some(scene.width);
                    row.height = Some(scene.height);
                    row.mean_db = scene.mean_db.map(|m| format!("{:.4}", m));
                    row.status = "processed".to_string();
                    scenes.push(scene);
                }
                Err(e) => {
                    tracing::error!("Failed to preprocess {}: {}", product.title, e);
                    row.status = format!("failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
            rows.push(row);
        }

        if scenes.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let downloaded: Vec<&PathBuf> = data.downloaded.iter().map(|(_, p)| p).collect();
        for product in &data.products {
            let archive_name = product.file_name();
            if downloaded.iter().any(|p| p.ends_with(&archive_name)) {
                continue;
            }
            rows.push(ManifestRow {
                id: &product.id,
                title: &product.title,
                start_date: product.start_date.as_deref().unwrap_or(""),
                orbit_direction: product.orbit_direction.as_deref().unwrap_or(""),
                polarisation: product.polarisation.as_deref().unwrap_or(""),
                archive: String::new(),
                output: String::new(),
                width: None,
                height: None,
                mean_db: None,
                status: "not_downloaded".to_string(),
            });
        }

        Ok(TransformResult {
            scenes,
            manifest_csv: manifest_csv(&rows)?,
            gedi_urls: data.gedi_urls,
        })
    }

    async fn load(&self, result: TransformResult) -> Result<String> {
        tracing::debug!(
            "Writing {} scenes, manifest and {} GEDI URLs",
            result.scenes.len(),
            result.gedi_urls.len()
        );

        for scene in &result.scenes {
            let file_name = format!("{}.tif", scene.name);
            self.storage.write_file(&file_name, &scene.geotiff).await?;
            tracing::info!("Saved {}", self.storage.location(&file_name));
        }

        self.storage
            .write_file(MANIFEST_FILE, result.manifest_csv.as_bytes())
            .await?;

        if !result.gedi_urls.is_empty() {
            let mut listing = result.gedi_urls.join("\n");
            listing.push('\n');
            self.storage
                .write_file(GEDI_URLS_FILE, listing.as_bytes())
                .await?;
        }

        Ok(self.storage.location(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::RetryPolicy;
    use crate::domain::model::parse_date;
    use crate::raster::Raster;
    use crate::sources::Credentials;
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;
    use zip::write::{FileOptions, ZipWriter};

    #[derive(Clone, Default)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        async fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().await.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .await
                .get(path)
                .cloned()
                .ok_or_else(|| AnalyticsError::FileNotFound {
                    path: path.to_string(),
                })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.files
                .lock()
                .await
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        fn location(&self, path: &str) -> String {
            format!("mock://{}", path)
        }
    }

    fn product(id: &str) -> Product {
        Product {
            id: id.to_string(),
            title: format!("S1A_IW_GRDH_{}.SAFE", id),
            start_date: Some("2022-06-20T22:59:26.000Z".to_string()),
            orbit_direction: Some("DESCENDING".to_string()),
            polarisation: Some("VV&VH".to_string()),
            download_url: None,
            properties: serde_json::Value::Null,
        }
    }

    fn write_safe(dir: &Path, product: &Product) -> PathBuf {
        let dn: Vec<u16> = (0..25).map(|v| 80 + v as u16).collect();
        let tiff = geotiff::encode_u16(5, 5, &dn).unwrap();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file::<_, ()>(
            format!("{}/measurement/s1a-iw-grd-vv-001.tiff", product.title),
            FileOptions::default(),
        )
        .unwrap();
        zip.write_all(&tiff).unwrap();
        let path = dir.join(product.file_name());
        std::fs::write(&path, zip.finish().unwrap().into_inner()).unwrap();
        path
    }

    fn pipeline(storage: MockStorage, dir: &TempDir) -> FirePipeline<MockStorage> {
        let range = DateRange::new(
            parse_date("2022-06-19").unwrap(),
            parse_date("2022-07-04").unwrap(),
        );
        let query = Sentinel1Query::new(Credentials::new("u", "p"), dir.path(), range)
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        FirePipeline::new(storage, query, BoundingBox::new(-120.5, 38.0, -120.0, 38.5))
            .with_options(PreprocessOptions {
                window_size: 3,
                ..PreprocessOptions::default()
            })
    }

    #[tokio::test]
    async fn test_transform_preprocesses_downloaded_scenes() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(MockStorage::default(), &dir);
        let (a, b) = (product("a"), product("b"));
        let archive = write_safe(dir.path(), &a);

        let result = pipeline
            .transform(ExtractResult {
                products: vec![a.clone(), b],
                downloaded: vec![(a, archive)],
                gedi_urls: vec!["https://data.example.com/g1.h5".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(result.scenes.len(), 1);
        let scene = &result.scenes[0];
        assert_eq!(scene.name, "S1A_IW_GRDH_a_vv");
        assert_eq!((scene.width, scene.height), (5, 5));
        assert!(scene.mean_db.unwrap() < 0.0);

        let decoded: Raster = geotiff::decode(&scene.geotiff).unwrap();
        assert_eq!(decoded.attr("units"), Some("dB"));

        let lines: Vec<&str> = result.manifest_csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,title,start_date"));
        assert!(lines[1].contains("S1A_IW_GRDH_a_vv.tif"));
        assert!(lines[1].ends_with("processed"));
        assert!(lines[2].ends_with("not_downloaded"));
        assert_eq!(result.gedi_urls.len(), 1);
    }

    #[tokio::test]
    async fn test_transform_fails_when_every_scene_fails() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(MockStorage::default(), &dir);
        let broken = dir.path().join("broken.zip");
        std::fs::write(&broken, b"not a zip").unwrap();

        let result = pipeline
            .transform(ExtractResult {
                products: vec![product("a")],
                downloaded: vec![(product("a"), broken)],
                gedi_urls: Vec::new(),
            })
            .await;
        assert!(matches!(result, Err(AnalyticsError::ZipError(_))));
    }

    #[tokio::test]
    async fn test_load_writes_outputs() {
        let dir = TempDir::new().unwrap();
        let storage = MockStorage::default();
        let pipeline = pipeline(storage.clone(), &dir);

        let location = pipeline
            .load(TransformResult {
                scenes: vec![ProcessedScene {
                    name: "scene_vv".to_string(),
                    width: 1,
                    height: 1,
                    mean_db: Some(-12.0),
                    geotiff: b"tiff".to_vec(),
                }],
                manifest_csv: "id\na\n".to_string(),
                gedi_urls: vec!["u1".to_string(), "u2".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(location, "mock://");
        assert_eq!(storage.get("scene_vv.tif").await.unwrap(), b"tiff");
        assert_eq!(storage.get(MANIFEST_FILE).await.unwrap(), b"id\na\n");
        assert_eq!(storage.get(GEDI_URLS_FILE).await.unwrap(), b"u1\nu2\n");
        assert_eq!(storage.read_file(MANIFEST_FILE).await.unwrap(), b"id\na\n");
    }

    #[tokio::test]
    async fn test_load_without_gedi_skips_url_list() {
        let dir = TempDir::new().unwrap();
        let storage = MockStorage::default();
        let pipeline = pipeline(storage.clone(), &dir);

        pipeline
            .load(TransformResult {
                manifest_csv: "id\n".to_string(),
                ..TransformResult::default()
            })
            .await
            .unwrap();
        assert!(storage.get(GEDI_URLS_FILE).await.is_none());
        assert!(storage.get(MANIFEST_FILE).await.is_some());
    }
}
