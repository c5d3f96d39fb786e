use crate::domain::model::{BoundingBox, DateRange};
use crate::utils::error::{AnalyticsError, Result};
use std::collections::HashSet;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: impl ToString, reason: impl Into<String>) -> AnalyticsError {
    AnalyticsError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(invalid(field_name, url_str, "URL cannot be empty"));
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(invalid(
                field_name,
                url_str,
                format!("Unsupported URL scheme: {}", scheme),
            )),
        },
        Err(e) => Err(invalid(
            field_name,
            url_str,
            format!("Invalid URL format: {}", e),
        )),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(invalid(
            field_name,
            value,
            format!("Value must be at least {}", min_value),
        ));
    }
    Ok(())
}

pub fn validate_file_extensions(
    field_name: &str,
    files: &[String],
    allowed_extensions: &[&str],
) -> Result<()> {
    let allowed_set: HashSet<String> = allowed_extensions
        .iter()
        .map(|ext| ext.to_ascii_lowercase())
        .collect();

    for file in files {
        match std::path::Path::new(file)
            .extension()
            .and_then(|ext| ext.to_str())
        {
            Some(extension) if allowed_set.contains(&extension.to_ascii_lowercase()) => {}
            Some(extension) => {
                return Err(invalid(
                    field_name,
                    file,
                    format!(
                        "Unsupported file extension: {}. Allowed extensions: {}",
                        extension,
                        allowed_extensions.join(", ")
                    ),
                ))
            }
            None => {
                return Err(invalid(
                    field_name,
                    file,
                    "File has no extension or invalid filename",
                ))
            }
        }
    }

    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| AnalyticsError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(
            field_name,
            value,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field_name,
            value,
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

/// Geographic bounds: WGS84 ranges and non-inverted corners.
pub fn validate_bbox(field_name: &str, bbox: &BoundingBox) -> Result<()> {
    validate_range(&format!("{}.min_lon", field_name), bbox.min_lon, -180.0, 180.0)?;
    validate_range(&format!("{}.max_lon", field_name), bbox.max_lon, -180.0, 180.0)?;
    validate_range(&format!("{}.min_lat", field_name), bbox.min_lat, -90.0, 90.0)?;
    validate_range(&format!("{}.max_lat", field_name), bbox.max_lat, -90.0, 90.0)?;

    if bbox.min_lon > bbox.max_lon || bbox.min_lat > bbox.max_lat {
        return Err(invalid(
            field_name,
            bbox.to_query_string(),
            "Minimum corner must not exceed maximum corner",
        ));
    }
    Ok(())
}

pub fn validate_date_range(field_name: &str, range: &DateRange) -> Result<()> {
    if range.start > range.end {
        return Err(invalid(
            field_name,
            format!("{} .. {}", range.start, range.end),
            "Start date must not be after end date",
        ));
    }
    Ok(())
}

pub fn validate_window_size(field_name: &str, window_size: usize) -> Result<()> {
    if window_size == 0 || window_size % 2 == 0 {
        return Err(invalid(
            field_name,
            window_size,
            "Window size must be a positive odd number",
        ));
    }
    Ok(())
}
