#![allow(dead_code)]

use post_fire_analytics::raster::{geotiff, GeoTransform, Raster};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::{FileOptions, ZipWriter};

/// Zipped SAFE product holding one measurement TIFF per polarisation.
pub fn safe_zip(title: &str, bands: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file::<_, ()>(format!("{}/manifest.safe", title), FileOptions::default())
        .unwrap();
    zip.write_all(b"<xfdu:XFDU/>").unwrap();

    for (pol, tiff) in bands {
        let name = format!(
            "{}/measurement/s1a-iw-grd-{}-20220620t225926-20220620t225951-043753-053941-001.tiff",
            title, pol
        );
        zip.start_file::<_, ()>(name, FileOptions::default()).unwrap();
        zip.write_all(tiff).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// 8x8 digital numbers on a 0.25 degree grid with its corner at (-121.0, 39.0).
pub fn geographic_band() -> Vec<u8> {
    let dn: Vec<f32> = (0..64).map(|v| 60.0 + ((v * 13) % 50) as f32).collect();
    let mut raster = Raster::new(8, 8, dn).unwrap();
    raster.transform = GeoTransform::north_up(-121.0, 39.0, 0.25, 0.25);
    raster.crs = Some("EPSG:4326".to_string());
    geotiff::encode(&raster).unwrap()
}

pub fn plain_band(width: u32, height: u32) -> Vec<u8> {
    let dn: Vec<u16> = (0..width * height).map(|v| 100 + (v % 40) as u16).collect();
    geotiff::encode_u16(width, height, &dn).unwrap()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// MTBS-style perimeter covering (-120.75, 38.25) to (-120.25, 38.75).
pub fn fire_geojson() -> String {
    serde_json::json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {
                "Incid_Name": "TEST FIRE",
                "Ig_Date": "2022-06-19",
                "Post_ID": "901403220220704"
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [-120.75, 38.25], [-120.25, 38.25], [-120.25, 38.75], [-120.75, 38.75], [-120.75, 38.25]
                ]]
            }
        }]
    })
    .to_string()
}
