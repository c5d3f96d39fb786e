//! Single-band raster grids with an affine georeference.

pub mod filters;
pub mod geotiff;
pub mod safe;

use crate::domain::model::BoundingBox;
use crate::utils::error::{AnalyticsError, Result};
use std::collections::BTreeMap;

/// GDAL-ordered affine transform:
/// `x = a*col + b*row + c`, `y = d*col + e*row + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl GeoTransform {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 0.0,
            e: 1.0,
            f: 0.0,
        }
    }

    /// North-up grid with top-left corner `(origin_x, origin_y)`.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height.abs(),
            f: origin_y,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn is_rotated(&self) -> bool {
        self.b != 0.0 || self.d != 0.0
    }

    /// Transform of the sub-grid starting at `(col, row)`.
    pub fn shifted(&self, col: usize, row: usize) -> Self {
        let (col, row) = (col as f64, row as f64);
        Self {
            c: self.a * col + self.b * row + self.c,
            f: self.d * col + self.e * row + self.f,
            ..*self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    /// Row-major samples, `width * height` long.
    pub data: Vec<f32>,
    pub transform: GeoTransform,
    pub crs: Option<String>,
    pub nodata: Option<f64>,
    pub attrs: BTreeMap<String, String>,
}

impl Raster {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            return Err(AnalyticsError::processing(format!(
                "raster of {}x{} needs {} samples, got {}",
                width,
                height,
                width * height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            transform: GeoTransform::identity(),
            crs: None,
            nodata: None,
            attrs: BTreeMap::new(),
        })
    }

    /// `(rows, cols)`, matching the `(y, x)` dimension order.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// Same georeference and metadata, new samples.
    pub fn with_data(&self, data: Vec<f32>) -> Result<Self> {
        let mut out = Self::new(self.width, self.height, data)?;
        out.transform = self.transform;
        out.crs = self.crs.clone();
        out.nodata = self.nodata;
        out.attrs = self.attrs.clone();
        Ok(out)
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            data: self.data.iter().map(|v| f(*v)).collect(),
            ..self.clone()
        }
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attrs.insert(key.into(), value.to_string());
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.width)
            .map(|col| col as f64 * self.transform.a + self.transform.c)
            .collect()
    }

    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.height)
            .map(|row| row as f64 * self.transform.e + self.transform.f)
            .collect()
    }

    /// Mean of the finite samples, `None` when there are none.
    pub fn mean(&self) -> Option<f64> {
        let (sum, count) = self
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0f64, 0usize), |(s, n), v| (s + *v as f64, n + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// Rows and columns whose coordinates lie inside `bounds` (inclusive).
    pub fn crop(&self, bounds: &BoundingBox) -> Result<Self> {
        if self.transform.is_rotated() {
            return Err(AnalyticsError::processing(
                "cannot crop a rotated raster by coordinates",
            ));
        }

        let cols = inclusive_span(&self.x_coords(), bounds.min_lon, bounds.max_lon);
        let rows = inclusive_span(&self.y_coords(), bounds.min_lat, bounds.max_lat);
        let (Some((col0, col1)), Some((row0, row1))) = (cols, rows) else {
            return Err(AnalyticsError::processing(format!(
                "bounds {} do not intersect the raster",
                bounds
            )));
        };

        let width = col1 - col0 + 1;
        let height = row1 - row0 + 1;
        let mut data = Vec::with_capacity(width * height);
        for row in row0..=row1 {
            let start = row * self.width;
            data.extend_from_slice(&self.data[start + col0..=start + col1]);
        }

        let mut out = Self::new(width, height, data)?;
        out.transform = self.transform.shifted(col0, row0);
        out.crs = self.crs.clone();
        out.nodata = self.nodata;
        out.attrs = self.attrs.clone();
        Ok(out)
    }
}

/// First and last index of monotonic `coords` falling in `[lo, hi]`.
fn inclusive_span(coords: &[f64], lo: f64, hi: f64) -> Option<(usize, usize)> {
    let inside = |v: &f64| *v >= lo && *v <= hi;
    let first = coords.iter().position(inside)?;
    let last = coords.iter().rposition(inside)?;
    Some((first, last))
}
