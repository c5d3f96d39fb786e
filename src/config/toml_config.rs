use crate::adapters::geojson::{read_fire_events, read_total_bounds};
use crate::adapters::http::RetryPolicy;
use crate::domain::model::{
    parse_date, BoundingBox, Calibration, DateRange, FireEvent, GediProduct, OrbitDirection,
    Polarization, ProductType, SensorMode, SpeckleFilter,
};
use crate::preprocess::PreprocessOptions;
use crate::sources::gedi::CMR_SEARCH_URL;
use crate::sources::sentinel1::{Credentials, Endpoints, DOWNLOAD_URL, SEARCH_URL, TOKEN_URL};
use crate::utils::error::{AnalyticsError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// A full acquisition and preprocessing run, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub area: AreaConfig,
    pub sentinel1: Sentinel1Config,
    pub gedi: Option<GediConfig>,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    pub output: OutputConfig,
    pub monitoring: Option<MonitoringConfig>,
    pub retry: Option<RetryConfig>,
    /// Fire event supplying the area and dates when the run file has none.
    #[serde(skip)]
    fire_event: OnceLock<Option<FireEvent>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AreaConfig {
    /// Fire perimeter file. Its total bounds become the area of interest, or
    /// the selected fire's bounds when the dates come from a fire event.
    pub geojson: Option<String>,
    /// `[west, south, east, north]`, used when no GeoJSON is given.
    pub bbox: Option<[f64; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentinel1Config {
    pub username: String,
    pub password: String,
    /// When omitted, taken from the first fire event in `area.geojson`.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub product_type: ProductType,
    pub orbit_direction: Option<OrbitDirection>,
    #[serde(default)]
    pub sensor_mode: SensorMode,
    pub max_products: Option<usize>,
    pub max_records: Option<usize>,
    pub concurrent_downloads: Option<usize>,
    pub download_dir: Option<String>,
    pub search_url: Option<String>,
    pub token_url: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GediConfig {
    #[serde(default)]
    pub product: GediProduct,
    /// Defaults to the Sentinel-1 start date through year end.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub max_results: Option<usize>,
    pub version: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub polarization: Polarization,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub speckle_filter: SpeckleFilter,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Crop window in the raster's CRS units.
    pub bounds: Option<[f64; 4]>,
    /// Clip to the bounding box of `area.geojson`.
    #[serde(default)]
    pub clip_to_area: bool,
}

fn default_window_size() -> usize {
    5
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            polarization: Polarization::default(),
            calibration: Calibration::default(),
            speckle_filter: SpeckleFilter::default(),
            window_size: default_window_size(),
            bounds: None,
            clip_to_area: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: Option<u32>,
    pub delay_seconds: Option<u64>,
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(AnalyticsError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| AnalyticsError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as-is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| AnalyticsError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        if self.area.geojson.is_none() && self.area.bbox.is_none() {
            return Err(AnalyticsError::MissingConfigError {
                field: "area.geojson or area.bbox".to_string(),
            });
        }
        if let Some(geojson) = &self.area.geojson {
            validation::validate_path("area.geojson", geojson)?;
            validation::validate_file_extensions(
                "area.geojson",
                std::slice::from_ref(geojson),
                &["geojson", "json"],
            )?;
        }
        if let Some(bbox) = self.area.bbox {
            validation::validate_bbox("area.bbox", &to_bbox(bbox))?;
        }

        let s1 = &self.sentinel1;
        for (field, value) in [
            ("sentinel1.username", &s1.username),
            ("sentinel1.password", &s1.password),
        ] {
            validation::validate_non_empty_string(field, value)?;
            if value.starts_with("${") {
                return Err(AnalyticsError::MissingConfigError {
                    field: format!("{} (environment variable {} is not set)", field, value),
                });
            }
        }
        if s1.start_date.is_some() != s1.end_date.is_some() {
            return Err(AnalyticsError::ConfigValidationError {
                field: "sentinel1.start_date".to_string(),
                message: "start_date and end_date must be given together".to_string(),
            });
        }
        if s1.start_date.is_none() && self.area.geojson.is_none() {
            return Err(AnalyticsError::MissingConfigError {
                field: "sentinel1.start_date (required without area.geojson)".to_string(),
            });
        }
        if let (Some(start), Some(end)) = (&s1.start_date, &s1.end_date) {
            validation::validate_date_range("sentinel1", &DateRange::parse(start, end)?)?;
        }
        if let Some(max) = s1.max_products {
            validation::validate_positive_number("sentinel1.max_products", max, 1)?;
        }
        if let Some(concurrent) = s1.concurrent_downloads {
            validation::validate_range("sentinel1.concurrent_downloads", concurrent, 1, 16)?;
        }
        for (field, url) in [
            ("sentinel1.search_url", &s1.search_url),
            ("sentinel1.token_url", &s1.token_url),
            ("sentinel1.download_url", &s1.download_url),
        ] {
            if let Some(url) = url {
                validation::validate_url(field, url)?;
            }
        }

        if let Some(gedi) = &self.gedi {
            if let Some(endpoint) = &gedi.endpoint {
                validation::validate_url("gedi.endpoint", endpoint)?;
            }
        }
        self.gedi_range()?;

        validation::validate_window_size("preprocess.window_size", self.preprocess.window_size)?;
        if let Some([west, south, east, north]) = self.preprocess.bounds {
            if west > east || south > north {
                return Err(AnalyticsError::InvalidConfigValueError {
                    field: "preprocess.bounds".to_string(),
                    value: format!("[{}, {}, {}, {}]", west, south, east, north),
                    reason: "Minimum corner must not exceed maximum corner".to_string(),
                });
            }
        }
        if self.preprocess.clip_to_area && self.area.geojson.is_none() {
            return Err(AnalyticsError::MissingConfigError {
                field: "area.geojson (required by preprocess.clip_to_area)".to_string(),
            });
        }

        validation::validate_path("output.path", &self.output.path)?;

        if let Some(retry) = &self.retry {
            if let Some(attempts) = retry.attempts {
                validation::validate_range("retry.attempts", attempts, 1, 10)?;
            }
        }

        Ok(())
    }

    /// Area of interest: the selected fire's bounds when the dates come from
    /// a fire event, else the GeoJSON's total bounds, else the explicit bbox.
    pub fn area_bounds(&self) -> Result<BoundingBox> {
        match (&self.area.geojson, self.area.bbox) {
            (Some(path), _) => match self.fire_event()? {
                Some(event) => Ok(event.bounds),
                None => read_total_bounds(path),
            },
            (None, Some(bbox)) => Ok(to_bbox(bbox)),
            (None, None) => Err(AnalyticsError::MissingConfigError {
                field: "area.geojson or area.bbox".to_string(),
            }),
        }
    }

    /// The fire event driving the run, or `None` when the run file gives
    /// explicit Sentinel-1 dates. The first event with both ignition and
    /// post-fire dates is chosen, and the choice is kept for later calls.
    pub fn fire_event(&self) -> Result<Option<FireEvent>> {
        if self.sentinel1.start_date.is_some() && self.sentinel1.end_date.is_some() {
            return Ok(None);
        }
        if let Some(event) = self.fire_event.get() {
            return Ok(event.clone());
        }

        let geojson = self
            .area
            .geojson
            .as_ref()
            .ok_or_else(|| AnalyticsError::MissingConfigError {
                field: "sentinel1.start_date".to_string(),
            })?;
        let event = read_fire_events(geojson)?
            .into_iter()
            .find(|e| e.post_fire_window().is_some())
            .ok_or_else(|| {
                AnalyticsError::geojson(format!(
                    "no fire event with Ig_Date and Post_ID in {}",
                    geojson
                ))
            })?;
        tracing::info!("Using fire event {} over {}", event.name, event.bounds);

        Ok(self.fire_event.get_or_init(|| Some(event)).clone())
    }

    /// Sentinel-1 search window. Without explicit dates the selected fire
    /// event supplies it.
    pub fn sentinel1_range(&self) -> Result<DateRange> {
        if let (Some(start), Some(end)) = (&self.sentinel1.start_date, &self.sentinel1.end_date) {
            return DateRange::parse(start, end);
        }

        let event = self
            .fire_event()?
            .ok_or_else(|| AnalyticsError::MissingConfigError {
                field: "sentinel1.start_date".to_string(),
            })?;
        let range = event
            .post_fire_window()
            .ok_or_else(|| AnalyticsError::geojson("fire event lost its dates"))?;
        tracing::info!(
            "Using post-fire window of {} ({} to {})",
            event.name,
            range.start.date(),
            range.end.date()
        );
        Ok(range)
    }

    /// GEDI search window. Missing dates fall back to the Sentinel-1 start
    /// (or the fire's lidar window) and December 31 of that year.
    pub fn gedi_range(&self) -> Result<Option<DateRange>> {
        let Some(gedi) = &self.gedi else {
            return Ok(None);
        };
        let range = match (&gedi.start_date, &gedi.end_date) {
            (Some(start), Some(end)) => DateRange::parse(start, end)?,
            (Some(start), None) => DateRange::to_end_of_year(parse_date(start)?),
            (None, Some(end)) => DateRange::new(self.sentinel1_range()?.start, parse_date(end)?),
            (None, None) => match self.fire_event()?.and_then(|e| e.lidar_window()) {
                Some(window) => window,
                None => DateRange::to_end_of_year(self.sentinel1_range()?.start),
            },
        };
        validation::validate_date_range("gedi", &range)?;
        Ok(Some(range))
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.sentinel1.username, &self.sentinel1.password)
    }

    pub fn endpoints(&self) -> Endpoints {
        let s1 = &self.sentinel1;
        Endpoints {
            search_url: s1.search_url.clone().unwrap_or_else(|| SEARCH_URL.to_string()),
            token_url: s1.token_url.clone().unwrap_or_else(|| TOKEN_URL.to_string()),
            download_url: s1
                .download_url
                .clone()
                .unwrap_or_else(|| DOWNLOAD_URL.to_string()),
        }
    }

    pub fn gedi_endpoint(&self) -> String {
        self.gedi
            .as_ref()
            .and_then(|g| g.endpoint.clone())
            .unwrap_or_else(|| CMR_SEARCH_URL.to_string())
    }

    pub fn output_path(&self) -> &str {
        &self.output.path
    }

    /// Where SAFE archives are downloaded; `<output>/raw` by default.
    pub fn download_dir(&self) -> PathBuf {
        self.sentinel1
            .download_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&self.output.path).join("raw"))
    }

    pub fn max_products(&self) -> usize {
        self.sentinel1.max_products.unwrap_or(1)
    }

    pub fn concurrent_downloads(&self) -> usize {
        self.sentinel1.concurrent_downloads.unwrap_or(2)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();
        match &self.retry {
            Some(retry) => RetryPolicy {
                attempts: retry.attempts.unwrap_or(default.attempts),
                delay: retry
                    .delay_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(default.delay),
            },
            None => default,
        }
    }

    /// Clipping follows `area_bounds`: the selected fire's bounds, or the
    /// whole GeoJSON.
    pub fn preprocess_options(&self) -> Result<PreprocessOptions> {
        let p = &self.preprocess;
        let (geojson, clip_area) = match (&self.area.geojson, p.clip_to_area) {
            (Some(path), true) => match self.fire_event()? {
                Some(event) => (None, Some(event.bounds)),
                None => (Some(PathBuf::from(path)), None),
            },
            _ => (None, None),
        };
        Ok(PreprocessOptions {
            polarization: p.polarization,
            calibration: p.calibration,
            filter: p.speckle_filter,
            window_size: p.window_size,
            bounds: p.bounds.map(to_bbox),
            geojson,
            clip_area,
        })
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }
}

fn to_bbox([west, south, east, north]: [f64; 4]) -> BoundingBox {
    BoundingBox::new(west, south, east, north)
}

impl Validate for RunConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
