//! Reading measurement bands out of zipped Sentinel-1 SAFE products.

use crate::domain::model::Polarization;
use crate::raster::{geotiff, Raster};
use crate::utils::error::{AnalyticsError, Result};
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use zip::ZipArchive;

/// First archive entry holding the `polarization` measurement TIFF.
pub fn find_measurement<'a, I>(names: I, polarization: Polarization) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let marker = format!("-{}-", polarization.as_str().to_ascii_lowercase());
    names.into_iter().find(|name| {
        name.contains("measurement/")
            && name.to_ascii_lowercase().contains(&marker)
            && name.ends_with(".tiff")
    })
}

pub fn read_band<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    polarization: Polarization,
    label: &str,
) -> Result<Raster> {
    let entry = find_measurement(archive.file_names(), polarization)
        .map(str::to_string)
        .ok_or_else(|| AnalyticsError::BandNotFound {
            polarization: polarization.to_string(),
            file: label.to_string(),
        })?;
    tracing::debug!("Found measurement file: {}", entry);

    let mut bytes = Vec::new();
    archive.by_name(&entry)?.read_to_end(&mut bytes)?;

    let mut raster = geotiff::decode(&bytes)?;
    raster.set_attr("polarization", polarization);
    Ok(raster)
}

pub fn load_band(path: &Path, polarization: Polarization) -> Result<Raster> {
    let file = std::fs::File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    read_band(&mut archive, polarization, &label)
}
