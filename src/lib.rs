//! Data acquisition and preprocessing for post-fire burn analysis with
//! Sentinel-1 SAR backscatter and GEDI spaceborne lidar.

pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod preprocess;
pub mod raster;
pub mod sources;
pub mod utils;

pub use adapters::storage::LocalStorage;
pub use config::RunConfig;
pub use crate::core::{etl::AnalyticsEngine, pipeline::FirePipeline};
pub use preprocess::{PreprocessOptions, Sentinel1Preprocessor};
pub use sources::{Credentials, GediClient, Sentinel1Query};
pub use utils::error::{AnalyticsError, Result};
