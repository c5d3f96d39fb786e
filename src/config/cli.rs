use crate::adapters::geojson::read_total_bounds;
use crate::domain::model::{
    parse_date, BoundingBox, Calibration, DateRange, GediProduct, OrbitDirection, Polarization,
    ProductType, SensorMode, SpeckleFilter,
};
use crate::preprocess::PreprocessOptions;
use crate::sources::Credentials;
use crate::utils::error::{AnalyticsError, Result};
use crate::utils::validation::{self, Validate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

fn parse_arg<T: FromStr<Err = AnalyticsError>>(value: &str) -> std::result::Result<T, String> {
    value.parse().map_err(|e: AnalyticsError| e.to_string())
}

#[derive(Debug, Parser)]
#[command(name = "post-fire-analytics")]
#[command(about = "Acquire and preprocess Sentinel-1 SAR and GEDI lidar data for burned areas")]
#[command(version)]
pub struct Cli {
    #[arg(long, short, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search GEDI granules in NASA CMR
    Gedi {
        #[command(subcommand)]
        action: GediAction,
    },
    /// Search and download Sentinel-1 products from the Copernicus Data Space
    S1 {
        #[command(subcommand)]
        action: S1Action,
    },
    /// Preprocess a downloaded Sentinel-1 SAFE archive into a GeoTIFF
    Preprocess(PreprocessArgs),
    /// Run acquisition and preprocessing from a TOML file
    Run(RunArgs),
}

#[derive(Debug, Subcommand)]
pub enum GediAction {
    /// Number of matching granules
    Count(GediArgs),
    /// Data file URLs of matching granules
    Urls {
        #[command(flatten)]
        query: GediArgs,

        #[arg(long, help = "Maximum number of URLs (0 = unlimited)")]
        max_results: Option<usize>,

        #[arg(long, help = "Write URLs to this file instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum S1Action {
    /// List matching products, optionally downloading them
    Query(S1QueryArgs),
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct AreaArgs {
    #[arg(long, help = "GeoJSON whose total bounds define the area")]
    pub geojson: Option<PathBuf>,

    #[arg(
        long,
        allow_hyphen_values = true,
        value_parser = parse_arg::<BoundingBox>,
        help = "west,south,east,north in degrees"
    )]
    pub bbox: Option<BoundingBox>,
}

impl AreaArgs {
    pub fn bounds(&self) -> Result<BoundingBox> {
        match (&self.geojson, self.bbox) {
            (Some(path), _) => read_total_bounds(path),
            (None, Some(bbox)) => Ok(bbox),
            (None, None) => Err(AnalyticsError::MissingConfigError {
                field: "--geojson or --bbox".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct GediArgs {
    #[command(flatten)]
    pub area: AreaArgs,

    #[arg(long, default_value = "GEDI02_A", value_parser = parse_arg::<GediProduct>)]
    pub product: GediProduct,

    #[arg(long, help = "Start date (YYYY-MM-DD)")]
    pub start: String,

    #[arg(long, help = "End date; defaults to the end of the start year")]
    pub end: Option<String>,

    #[arg(long, help = "CMR granule search endpoint")]
    pub endpoint: Option<String>,
}

impl GediArgs {
    pub fn range(&self) -> Result<DateRange> {
        match &self.end {
            Some(end) => DateRange::parse(&self.start, end),
            None => Ok(DateRange::to_end_of_year(parse_date(&self.start)?)),
        }
    }
}

impl Validate for GediArgs {
    fn validate(&self) -> Result<()> {
        if let Some(bbox) = &self.area.bbox {
            validation::validate_bbox("--bbox", bbox)?;
        }
        if let Some(endpoint) = &self.endpoint {
            validation::validate_url("--endpoint", endpoint)?;
        }
        validation::validate_date_range("--start/--end", &self.range()?)
    }
}

#[derive(Debug, Clone, Args)]
pub struct S1QueryArgs {
    #[command(flatten)]
    pub area: AreaArgs,

    #[arg(long, help = "Start date (YYYY-MM-DD)")]
    pub start: String,

    #[arg(long, help = "End date (YYYY-MM-DD)")]
    pub end: String,

    #[arg(long, default_value = "GRD", value_parser = parse_arg::<ProductType>)]
    pub product_type: ProductType,

    #[arg(long, value_parser = parse_arg::<OrbitDirection>)]
    pub orbit_direction: Option<OrbitDirection>,

    #[arg(long, default_value = "IW", value_parser = parse_arg::<SensorMode>)]
    pub sensor_mode: SensorMode,

    #[arg(long, default_value = "50")]
    pub max_records: usize,

    #[arg(long, help = "Download the first --max-products results")]
    pub download: bool,

    #[arg(long, default_value = "1")]
    pub max_products: usize,

    #[arg(long, default_value = "2")]
    pub concurrent_downloads: usize,

    #[arg(long, default_value = "./data/sentinel1")]
    pub output_dir: PathBuf,

    #[arg(long, env = "COPERNICUS_USERNAME")]
    pub username: String,

    #[arg(long, env = "COPERNICUS_PASSWORD", hide_env_values = true)]
    pub password: String,
}

impl S1QueryArgs {
    pub fn range(&self) -> Result<DateRange> {
        DateRange::parse(&self.start, &self.end)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }
}

impl Validate for S1QueryArgs {
    fn validate(&self) -> Result<()> {
        if let Some(bbox) = &self.area.bbox {
            validation::validate_bbox("--bbox", bbox)?;
        }
        validation::validate_non_empty_string("--username", &self.username)?;
        validation::validate_non_empty_string("--password", &self.password)?;
        validation::validate_date_range("--start/--end", &self.range()?)?;
        validation::validate_positive_number("--max-products", self.max_products, 1)?;
        validation::validate_range("--concurrent-downloads", self.concurrent_downloads, 1, 16)
    }
}

#[derive(Debug, Clone, Args)]
pub struct PreprocessArgs {
    #[arg(long, help = "Sentinel-1 SAFE zip archive")]
    pub input: PathBuf,

    #[arg(long, help = "Output GeoTIFF path")]
    pub output: PathBuf,

    #[arg(long, default_value = "VV", value_parser = parse_arg::<Polarization>)]
    pub polarization: Polarization,

    #[arg(long, default_value = "sigma0", value_parser = parse_arg::<Calibration>)]
    pub calibration: Calibration,

    #[arg(long, default_value = "lee", value_parser = parse_arg::<SpeckleFilter>)]
    pub filter: SpeckleFilter,

    #[arg(long, default_value = "5")]
    pub window_size: usize,

    #[arg(
        long,
        allow_hyphen_values = true,
        value_parser = parse_arg::<BoundingBox>,
        help = "Crop window in the raster's CRS units: minx,miny,maxx,maxy"
    )]
    pub bounds: Option<BoundingBox>,

    #[arg(long, help = "Clip to the bounding box of this GeoJSON")]
    pub clip_geojson: Option<PathBuf>,
}

impl PreprocessArgs {
    pub fn options(&self) -> PreprocessOptions {
        PreprocessOptions {
            polarization: self.polarization,
            calibration: self.calibration,
            filter: self.filter,
            window_size: self.window_size,
            bounds: self.bounds,
            geojson: self.clip_geojson.clone(),
            clip_area: None,
        }
    }
}

impl Validate for PreprocessArgs {
    fn validate(&self) -> Result<()> {
        let input = self.input.display().to_string();
        validation::validate_file_extensions("--input", &[input], &["zip"])?;
        let output = self.output.display().to_string();
        validation::validate_file_extensions("--output", &[output], &["tif", "tiff"])?;
        validation::validate_window_size("--window-size", self.window_size)
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[arg(long, short, help = "TOML run configuration")]
    pub config: PathBuf,

    #[arg(long, help = "Validate the configuration and print the plan without running")]
    pub dry_run: bool,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,
}
