use crate::utils::error::{AnalyticsError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Axis-aligned bounds. In geographic contexts the fields are degrees; when
/// cropping a raster they are interpreted in the raster's own CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// `west,south,east,north`, the order both CMR and CDSE expect.
    pub fn to_query_string(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.4}, {:.4}, {:.4}, {:.4}]",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

impl FromStr for BoundingBox {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AnalyticsError::ValidationError {
                message: format!("Invalid bounding box '{}': {}", s, e),
            })?;

        match parts.as_slice() {
            [w, s, e, n] => Ok(BoundingBox::new(*w, *s, *e, *n)),
            _ => Err(AnalyticsError::ValidationError {
                message: format!(
                    "Bounding box '{}' must have four values: west,south,east,north",
                    s
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self::new(parse_date(start)?, parse_date(end)?))
    }

    /// From `start` through December 31st of the same year.
    pub fn to_end_of_year(start: NaiveDateTime) -> Self {
        let end = NaiveDate::from_ymd_opt(start.year(), 12, 31)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(start);
        Self::new(start, end)
    }
}

pub const QUERY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_query_date(date: &NaiveDateTime) -> String {
    date.format(QUERY_DATE_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS`, RFC 3339, or epoch milliseconds.
pub fn parse_date(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_utc());
    }
    if let Ok(millis) = trimmed.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp_millis(millis) {
            return Ok(dt.naive_utc());
        }
    }

    Err(AnalyticsError::DateParseError {
        value: value.to_string(),
    })
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AnalyticsError;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(AnalyticsError::InvalidConfigValueError {
                    field: stringify!($name).to_string(),
                    value: s.to_string(),
                    reason: format!("Expected one of: {}", [$($text),+].join(", ")),
                })
            }
        }
    };
}

string_enum!(
    /// SAR polarisation channel.
    Polarization { VV => "VV", VH => "VH", HH => "HH", HV => "HV" }
);

string_enum!(
    Calibration { Sigma0 => "sigma0", Gamma0 => "gamma0", Beta0 => "beta0" }
);

string_enum!(
    SpeckleFilter { Lee => "lee", RefinedLee => "refined_lee", Median => "median" }
);

string_enum!(
    ProductType { Grd => "GRD", Slc => "SLC", Ocn => "OCN" }
);

string_enum!(
    OrbitDirection { Ascending => "ASCENDING", Descending => "DESCENDING" }
);

string_enum!(
    SensorMode { Sm => "SM", Iw => "IW", Ew => "EW", Wv => "WV" }
);

string_enum!(
    /// GEDI collections searchable in CMR, by short name.
    GediProduct {
        L1B => "GEDI01_B",
        L2A => "GEDI02_A",
        L2B => "GEDI02_B",
        L4A => "GEDI04_A",
    }
);

impl Default for Polarization {
    fn default() -> Self {
        Self::VV
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::Sigma0
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::Lee
    }
}

impl Default for ProductType {
    fn default() -> Self {
        Self::Grd
    }
}

impl Default for SensorMode {
    fn default() -> Self {
        Self::Iw
    }
}

impl Default for GediProduct {
    fn default() -> Self {
        Self::L2A
    }
}

/// A Sentinel-1 catalogue entry as returned by the CDSE OpenSearch API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub start_date: Option<String>,
    pub orbit_direction: Option<String>,
    pub polarisation: Option<String>,
    pub download_url: Option<String>,
    pub properties: serde_json::Value,
}

impl Product {
    /// Builds a product from a GeoJSON feature; `None` when it has no id.
    pub fn from_feature(feature: &serde_json::Value) -> Option<Self> {
        let properties = feature.get("properties").cloned().unwrap_or_default();
        let text = |key: &str| {
            properties
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let id = feature
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| text("id"))?;
        let title = text("title").unwrap_or_else(|| id.clone());
        let download_url = properties
            .pointer("/services/download/url")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Some(Self {
            id,
            title,
            start_date: text("startDate"),
            orbit_direction: text("orbitDirection"),
            polarisation: text("polarisation"),
            download_url,
            properties,
        })
    }

    /// Archive name on disk: `<title>.zip`.
    pub fn file_name(&self) -> String {
        format!("{}.zip", self.title)
    }

    /// Title without a trailing `.SAFE`, used to name derived outputs.
    pub fn scene_name(&self) -> &str {
        self.title.strip_suffix(".SAFE").unwrap_or(&self.title)
    }
}

/// An MTBS burned-area perimeter.
#[derive(Debug, Clone, PartialEq)]
pub struct FireEvent {
    pub name: String,
    pub ignition_date: Option<NaiveDateTime>,
    pub post_fire_date: Option<NaiveDateTime>,
    pub bounds: BoundingBox,
}

impl FireEvent {
    /// Ignition through the post-fire image date, when both are known.
    pub fn post_fire_window(&self) -> Option<DateRange> {
        match (self.ignition_date, self.post_fire_date) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)),
            _ => None,
        }
    }

    /// Ignition through year end: the GEDI acquisition window.
    pub fn lidar_window(&self) -> Option<DateRange> {
        self.ignition_date.map(DateRange::to_end_of_year)
    }
}

/// Output of the acquisition phase.
#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    pub products: Vec<Product>,
    pub downloaded: Vec<(Product, PathBuf)>,
    pub gedi_urls: Vec<String>,
}

/// One preprocessed scene, already encoded as GeoTIFF.
#[derive(Debug, Clone)]
pub struct ProcessedScene {
    pub name: String,
    pub width: usize,
    pub height: usize,
    /// Mean backscatter in dB over finite pixels.
    pub mean_db: Option<f64>,
    pub geotiff: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    pub scenes: Vec<ProcessedScene>,
    pub manifest_csv: String,
    pub gedi_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2022, 6, 19)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_date("2022-06-19").unwrap(), expected);
        assert_eq!(parse_date("2022-06-19T00:00:00").unwrap(), expected);
        assert_eq!(parse_date("2022-06-19T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_date("1655596800000").unwrap(), expected);
        assert!(parse_date("19/06/2022").is_err());
    }

    #[test]
    fn test_query_date_format() {
        let dt = parse_date("2022-06-25").unwrap();
        assert_eq!(format_query_date(&dt), "2022-06-25T00:00:00Z");
    }

    #[test]
    fn test_bbox_from_str() {
        let bbox: BoundingBox = "-120.5, 38.0,-120.0,38.5".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(-120.5, 38.0, -120.0, 38.5));
        assert_eq!(bbox.to_query_string(), "-120.5,38,-120,38.5");
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!("vh".parse::<Polarization>().unwrap(), Polarization::VH);
        assert_eq!("Refined_Lee".parse::<SpeckleFilter>().unwrap(), SpeckleFilter::RefinedLee);
        assert_eq!("gedi04_a".parse::<GediProduct>().unwrap(), GediProduct::L4A);
        assert!("XX".parse::<Polarization>().is_err());
        assert_eq!(OrbitDirection::Descending.to_string(), "DESCENDING");
    }

    #[test]
    fn test_product_from_feature() {
        let feature = serde_json::json!({
            "type": "Feature",
            "id": "abc-123",
            "properties": {
                "title": "S1A_IW_GRDH_1SDV_20220620T225926.SAFE",
                "startDate": "2022-06-20T22:59:26.000Z",
                "orbitDirection": "DESCENDING",
                "polarisation": "VV&VH",
                "services": {"download": {"url": "https://example.com/download/abc-123"}}
            }
        });

        let product = Product::from_feature(&feature).unwrap();
        assert_eq!(product.id, "abc-123");
        assert_eq!(product.orbit_direction.as_deref(), Some("DESCENDING"));
        assert_eq!(
            product.download_url.as_deref(),
            Some("https://example.com/download/abc-123")
        );
        assert_eq!(product.file_name(), "S1A_IW_GRDH_1SDV_20220620T225926.SAFE.zip");
        assert_eq!(product.scene_name(), "S1A_IW_GRDH_1SDV_20220620T225926");

        assert!(Product::from_feature(&serde_json::json!({"properties": {}})).is_none());
    }

    #[test]
    fn test_fire_event_windows() {
        let event = FireEvent {
            name: "TEST FIRE".to_string(),
            ignition_date: Some(parse_date("2022-06-19").unwrap()),
            post_fire_date: Some(parse_date("2022-07-04").unwrap()),
            bounds: BoundingBox::new(-120.5, 38.0, -120.0, 38.5),
        };

        let post = event.post_fire_window().unwrap();
        assert_eq!(post.end, parse_date("2022-07-04").unwrap());

        let lidar = event.lidar_window().unwrap();
        assert_eq!(lidar.end, parse_date("2022-12-31").unwrap());
    }
}
