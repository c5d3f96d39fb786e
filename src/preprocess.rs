//! Sentinel-1 GRD preprocessing for burn analysis: band loading, radiometric
//! calibration, decibel conversion, speckle filtering, cropping and export.

use crate::adapters::geojson::read_total_bounds;
use crate::domain::model::{BoundingBox, Calibration, Polarization, SpeckleFilter};
use crate::raster::{filters, geotiff, safe, Raster};
use crate::utils::error::{AnalyticsError, Result};
use crate::utils::validation::validate_window_size;
use std::path::{Path, PathBuf};

/// Power floor substituted for non-positive values before taking logs.
pub const DB_FLOOR: f32 = 1e-10;
/// Divisor of the `DN^2` power approximation.
pub const CALIBRATION_SCALE: f32 = 1e6;

pub struct Sentinel1Preprocessor {
    safe_zip_path: PathBuf,
}

impl Sentinel1Preprocessor {
    pub fn new(safe_zip_path: impl Into<PathBuf>) -> Result<Self> {
        let safe_zip_path = safe_zip_path.into();
        if !safe_zip_path.exists() {
            return Err(AnalyticsError::FileNotFound {
                path: safe_zip_path.display().to_string(),
            });
        }

        tracing::info!("Initialized preprocessor for {}", display_name(&safe_zip_path));
        Ok(Self { safe_zip_path })
    }

    pub fn path(&self) -> &Path {
        &self.safe_zip_path
    }

    pub fn load_band(&self, polarization: Polarization) -> Result<Raster> {
        tracing::info!("Loading {} polarization band", polarization);
        let raster = safe::load_band(&self.safe_zip_path, polarization)?;
        tracing::info!(
            "Loaded {} band with shape {:?}",
            polarization,
            raster.shape()
        );
        Ok(raster)
    }

    /// Converts digital numbers to linear power as `DN^2 / 1e6`.
    ///
    /// All three calibration kinds share this approximation; the choice is
    /// recorded in the metadata.
    pub fn calibrate(&self, data: &Raster, calibration: Calibration) -> Raster {
        tracing::info!("Applying {} radiometric calibration", calibration);

        let mut calibrated = data.map(|dn| (dn * dn) / CALIBRATION_SCALE);
        calibrated.set_attr("calibration", calibration);
        calibrated.set_attr("units", "linear");

        tracing::info!("Calibration complete");
        calibrated
    }

    pub fn to_db(&self, data: &Raster) -> Raster {
        tracing::info!("Converting to dB scale");

        let mut db = data.map(|v| {
            // NaN fails the comparison and is floored too
            let power = if v > 0.0 { v } else { DB_FLOOR };
            10.0 * power.log10()
        });
        db.set_attr("units", "dB");

        tracing::info!("Conversion to dB complete");
        db
    }

    pub fn apply_speckle_filter(
        &self,
        data: &Raster,
        filter: SpeckleFilter,
        window_size: usize,
    ) -> Result<Raster> {
        validate_window_size("window_size", window_size)?;
        tracing::info!(
            "Applying {} filter with window size {}",
            filter,
            window_size
        );

        let filtered = match filter {
            SpeckleFilter::Median => {
                filters::median(&data.data, data.width, data.height, window_size)
            }
            // edge-aware refinement not implemented; plain Lee is used
            SpeckleFilter::Lee | SpeckleFilter::RefinedLee => {
                filters::lee(&data.data, data.width, data.height, window_size)
            }
        };

        let mut result = data.with_data(filtered)?;
        result.set_attr("speckle_filter", filter);
        result.set_attr("filter_window", window_size);

        tracing::info!("Speckle filtering complete");
        Ok(result)
    }

    /// Crops to `bounds` given in the raster's own CRS units.
    pub fn crop_to_bounds(&self, data: &Raster, bounds: &BoundingBox) -> Result<Raster> {
        tracing::info!("Cropping to bounds: {:?}", bounds.as_array());
        let cropped = data.crop(bounds)?;
        tracing::info!("Cropped to shape {:?}", cropped.shape());
        Ok(cropped)
    }

    /// Restricts the raster to the bounding box of a GeoJSON file.
    pub fn clip_to_geojson<P: AsRef<Path>>(&self, data: &Raster, geojson_path: P) -> Result<Raster> {
        let geojson_path = geojson_path.as_ref();
        tracing::info!("Clipping to GeoJSON bbox: {}", geojson_path.display());

        let bounds = read_total_bounds(geojson_path)?;
        self.clip_to_area(data, &bounds)
    }

    /// Restricts the raster to WGS84 `bounds`.
    ///
    /// The crop only happens when the raster is georeferenced in EPSG:4326.
    /// Otherwise the bounds are only recorded in the metadata.
    pub fn clip_to_area(&self, data: &Raster, bounds: &BoundingBox) -> Result<Raster> {
        tracing::info!("GeoJSON bounds: {:?}", bounds.as_array());

        let mut clipped = if is_wgs84(data) && !data.transform.is_identity() {
            let mut cropped = self.crop_to_bounds(data, bounds)?;
            cropped.set_attr("cropped", "true");
            cropped
        } else {
            tracing::warn!(
                "Clipping to bounding box only - SAR data not georeferenced in EPSG:4326. \
                 Consider using crop_to_bounds() with pixel coordinates for exact control."
            );
            data.clone()
        };

        let [minx, miny, maxx, maxy] = bounds.as_array();
        clipped.set_attr(
            "geojson_bounds",
            format!("[{}, {}, {}, {}]", minx, miny, maxx, maxy),
        );

        tracing::info!("Added GeoJSON bounds to metadata");
        Ok(clipped)
    }

    pub fn save<P: AsRef<Path>>(&self, data: &Raster, output_path: P) -> Result<()> {
        let output_path = output_path.as_ref();
        tracing::info!("Saving to {}", output_path.display());
        geotiff::write(data, output_path)?;
        tracing::info!("Saved to {}", output_path.display());
        Ok(())
    }
}

fn is_wgs84(data: &Raster) -> bool {
    data.crs
        .as_deref()
        .and_then(geotiff::parse_epsg)
        .map(|code| code == 4326)
        .unwrap_or(false)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Options for [`Sentinel1Preprocessor::run`].
#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    pub polarization: Polarization,
    pub calibration: Calibration,
    pub filter: SpeckleFilter,
    pub window_size: usize,
    pub bounds: Option<BoundingBox>,
    pub geojson: Option<PathBuf>,
    /// WGS84 clip area; used instead of `geojson` when set.
    pub clip_area: Option<BoundingBox>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            polarization: Polarization::VV,
            calibration: Calibration::Sigma0,
            filter: SpeckleFilter::Lee,
            window_size: 5,
            bounds: None,
            geojson: None,
            clip_area: None,
        }
    }
}

impl Sentinel1Preprocessor {
    /// Load, calibrate, dB, filter, then crop and/or clip.
    pub fn run(&self, options: &PreprocessOptions) -> Result<Raster> {
        let band = self.load_band(options.polarization)?;
        let calibrated = self.calibrate(&band, options.calibration);
        let db = self.to_db(&calibrated);
        let mut result = self.apply_speckle_filter(&db, options.filter, options.window_size)?;

        if let Some(bounds) = &options.bounds {
            result = self.crop_to_bounds(&result, bounds)?;
        }
        if let Some(area) = &options.clip_area {
            result = self.clip_to_area(&result, area)?;
        } else if let Some(geojson) = &options.geojson {
            result = self.clip_to_geojson(&result, geojson)?;
        }
        Ok(result)
    }
}
