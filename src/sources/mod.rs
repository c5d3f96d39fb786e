//! Remote data sources: NASA CMR for GEDI and the Copernicus Data Space for Sentinel-1.

pub mod gedi;
pub mod sentinel1;

pub use gedi::GediClient;
pub use sentinel1::{Credentials, Sentinel1Query};
