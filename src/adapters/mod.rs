// Adapters layer: concrete implementations for external systems.

pub mod geojson;
pub mod http;
pub mod storage;
