//! GeoTIFF reading and writing for single-band rasters.
//!
//! Georeferencing follows the GeoTIFF 1.0 tags (pixel scale + tiepoint, or a
//! full model transformation) and an EPSG code from the GeoKey directory.
//! Nodata and free-form metadata use GDAL's private tags.

use crate::raster::{GeoTransform, Raster};
use crate::utils::error::{AnalyticsError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_METADATA: u16 = 42112;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn find_f64s<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<Vec<f64>>> {
    Ok(decoder
        .find_tag(tag(code))?
        .map(|v| v.into_f64_vec())
        .transpose()?)
}

pub fn decode(bytes: &[u8]) -> Result<Raster> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let transform = read_transform(&mut decoder)?;
    let crs = decoder
        .find_tag(tag(GEO_KEY_DIRECTORY))?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .and_then(|keys| epsg_from_geokeys(&keys));
    let nodata = decoder
        .find_tag(tag(GDAL_NODATA))?
        .map(|v| v.into_string())
        .transpose()?
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());
    let attrs = decoder
        .find_tag(tag(GDAL_METADATA))?
        .map(|v| v.into_string())
        .transpose()?
        .map(|xml| parse_gdal_metadata(&xml))
        .unwrap_or_default();

    let samples = to_f32(decoder.read_image()?)?;
    let pixels = width * height;
    if pixels == 0 || samples.len() < pixels {
        return Err(AnalyticsError::processing(format!(
            "TIFF declares {}x{} pixels but holds {} samples",
            width,
            height,
            samples.len()
        )));
    }

    // Interleaved multi-sample images: keep the first band.
    let stride = samples.len() / pixels;
    let data = if stride == 1 {
        samples
    } else {
        samples.into_iter().step_by(stride).take(pixels).collect()
    };

    let mut raster = Raster::new(width, height, data)?;
    raster.transform = transform;
    raster.crs = crs;
    raster.nodata = nodata;
    raster.attrs = attrs;
    Ok(raster)
}

pub fn read<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

fn to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return Err(AnalyticsError::processing("unsupported TIFF sample format")),
    })
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(m) = find_f64s(decoder, MODEL_TRANSFORMATION)? {
        if m.len() >= 8 {
            return Ok(GeoTransform {
                a: m[0],
                b: m[1],
                c: m[3],
                d: m[4],
                e: m[5],
                f: m[7],
            });
        }
    }

    let scale = find_f64s(decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = find_f64s(decoder, MODEL_TIEPOINT)?;
    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let (i, j, x, y) = (t[0], t[1], t[3], t[4]);
            Ok(GeoTransform {
                a: s[0],
                b: 0.0,
                c: x - i * s[0],
                d: 0.0,
                e: -s[1],
                f: y + j * s[1],
            })
        }
        _ => Ok(GeoTransform::identity()),
    }
}

fn epsg_from_geokeys(keys: &[u16]) -> Option<String> {
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;
    let mut projected = None;
    let mut geographic = None;

    for entry in keys[4..].chunks_exact(4).take(count) {
        // only keys stored inline in the directory
        if entry[1] != 0 {
            continue;
        }
        match entry[0] {
            PROJECTED_CS_TYPE_KEY => projected = Some(entry[3]),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(entry[3]),
            _ => {}
        }
    }

    projected
        .or(geographic)
        .filter(|code| *code != 0 && *code != USER_DEFINED)
        .map(|code| format!("EPSG:{}", code))
}

/// EPSG code of a `EPSG:<code>` string, if it fits a GeoKey.
pub fn parse_epsg(crs: &str) -> Option<u16> {
    let (authority, code) = crs.trim().split_once(':')?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    code.trim().parse::<u16>().ok()
}

fn is_geographic(code: u16) -> bool {
    (4000..5000).contains(&code)
}

#[rustfmt::skip]
fn geokeys_for(code: u16) -> Vec<u16> {
    let (model, key) = if is_geographic(code) {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_KEY)
    };
    vec![
        1, 1, 0, 3,
        GT_MODEL_TYPE_KEY, 0, 1, model,
        GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        key, 0, 1, code,
    ]
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

fn gdal_metadata_xml(attrs: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<GDALMetadata>");
    for (key, value) in attrs {
        xml.push_str(&format!(
            "<Item name=\"{}\">{}</Item>",
            escape_xml(key),
            escape_xml(value)
        ));
    }
    xml.push_str("</GDALMetadata>");
    xml
}

fn parse_gdal_metadata(xml: &str) -> BTreeMap<String, String> {
    let Ok(re) = Regex::new(r#"<Item name="([^"]*)"[^>]*>([^<]*)</Item>"#) else {
        return BTreeMap::new();
    };
    re.captures_iter(xml)
        .map(|caps| (unescape_xml(&caps[1]), unescape_xml(&caps[2])))
        .collect()
}

/// Encodes `raster` as a Float32 GeoTIFF.
pub fn encode(raster: &Raster) -> Result<Vec<u8>> {
    let epsg = match raster.crs.as_deref() {
        Some(crs) => {
            let code = parse_epsg(crs);
            if code.is_none() {
                tracing::warn!("Could not parse CRS: {}, saving without CRS", crs);
            }
            code
        }
        None => None,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        let mut image = encoder.new_image::<colortype::Gray32Float>(
            raster.width as u32,
            raster.height as u32,
        )?;

        {
            let dir = image.encoder();
            let t = raster.transform;
            if t.is_rotated() {
                #[rustfmt::skip]
                let matrix = [
                    t.a, t.b, 0.0, t.c,
                    t.d, t.e, 0.0, t.f,
                    0.0, 0.0, 0.0, 0.0,
                    0.0, 0.0, 0.0, 1.0,
                ];
                dir.write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
            } else if !t.is_identity() {
                let scale = [t.a, -t.e, 0.0];
                let tiepoint = [0.0, 0.0, 0.0, t.c, t.f, 0.0];
                dir.write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])?;
                dir.write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])?;
            }

            if let Some(code) = epsg {
                let keys = geokeys_for(code);
                dir.write_tag(tag(GEO_KEY_DIRECTORY), &keys[..])?;
            }

            if let Some(nodata) = raster.nodata {
                let text = nodata.to_string();
                dir.write_tag(tag(GDAL_NODATA), text.as_str())?;
            }

            if !raster.attrs.is_empty() {
                let xml = gdal_metadata_xml(&raster.attrs);
                dir.write_tag(tag(GDAL_METADATA), xml.as_str())?;
            }
        }

        image.write_data(&raster.data)?;
    }

    Ok(cursor.into_inner())
}

pub fn write<P: AsRef<Path>>(raster: &Raster, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = encode(raster)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Encodes a plain (non-geo) 16-bit TIFF, the layout of SAFE measurement files.
pub fn encode_u16(width: u32, height: u32, data: &[u16]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        encoder.write_image::<colortype::Gray16>(width, height, data)?;
    }
    Ok(cursor.into_inner())
}
