//! Raster collaborator: metadata extraction and COG conversion.
//!
//! The production implementation shells out to the GDAL command-line tools;
//! the orchestrator only sees the `RasterOps` trait.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::error::{Error, Result};

/// Coordinate reference system descriptor as reported by the raster source.
#[derive(Debug, Clone, PartialEq)]
pub enum Crs {
    /// Bare numeric spatial-reference identifier.
    Code(i32),
    /// namespace:code form, e.g. `EPSG:32633`.
    Tagged(String),
    /// Opaque well-known text with no resolvable identifier.
    Wkt(String),
}

impl Crs {
    /// Numeric identifier embedded in the descriptor, if any.
    pub fn epsg(self: &Self) -> Option<i32> {
        match self {
            Crs::Code(code) => Some(*code),
            Crs::Tagged(tag) => tag.rsplit(':').next()?.parse().ok(),
            Crs::Wkt(_) => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Code(code) => write!(f, "{code}"),
            Crs::Tagged(tag) => write!(f, "{tag}"),
            Crs::Wkt(wkt) => write!(f, "{wkt}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RasterMetadata {
    /// minX, minY, maxX, maxY in the raster's native CRS.
    pub bbox: [f64; 4],
    /// GeoJSON polygon matching the bbox.
    pub footprint: Value,
    pub crs: Crs,
    /// Spatial-reference identifier natively resolved by the provider.
    pub epsg: Option<i32>,
    /// Pixel size along x.
    pub resolution: f64,
    pub data_type: String,
}

pub trait RasterOps {
    async fn metadata(self: &Self, file_path: &Path) -> Result<RasterMetadata>;

    /// Convert `source_file` (relative to `input_dir`) into a tiled COG under
    /// `output_dir`, creating the directory if missing. Returns the output
    /// path.
    async fn convert(
        self: &Self,
        source_file: &str,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf>;
}

/// GeoJSON polygon ring for a bbox, closed.
pub fn bbox_footprint(bbox: &[f64; 4]) -> Value {
    let [min_x, min_y, max_x, max_y] = *bbox;
    json!({
        "type": "Polygon",
        "coordinates": [[
            [min_x, min_y],
            [min_x, max_y],
            [max_x, max_y],
            [max_x, min_y],
            [min_x, min_y]
        ]]
    })
}

const COG_CREATION_OPTIONS: [&str; 8] = [
    "TILED=YES",
    "COPY_SRC_OVERVIEWS=YES",
    "COMPRESS=DEFLATE",
    "ZLEVEL=9",
    "BLOCKXSIZE=512",
    "BLOCKYSIZE=512",
    "PREDICTOR=1",
    "PROFILE=GeoTIFF",
];

const OVERVIEW_LEVELS: [&str; 5] = ["2", "4", "8", "16", "32"];

/// Runs the GDAL command-line tools.
pub struct GdalRasterOps;

impl GdalRasterOps {
    async fn run(self: &Self, program: &str, args: &[&str], file: &Path) -> Result<Vec<u8>> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Raster {
                file: file.to_path_buf(),
                reason: format!("failed to spawn {program}: {e}"),
            })?;
        if !output.status.success() {
            return Err(Error::Raster {
                file: file.to_path_buf(),
                reason: format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

impl RasterOps for GdalRasterOps {
    async fn metadata(self: &Self, file_path: &Path) -> Result<RasterMetadata> {
        let path = file_path.to_str().ok_or_else(|| Error::Raster {
            file: file_path.to_path_buf(),
            reason: "path is not valid UTF-8".to_string(),
        })?;
        let stdout = self.run("gdalinfo", &["-json", path], file_path).await?;
        let report: Value = serde_json::from_slice(&stdout).map_err(|e| Error::Raster {
            file: file_path.to_path_buf(),
            reason: format!("unreadable gdalinfo report: {e}"),
        })?;
        parse_gdalinfo(file_path, &report)
    }

    async fn convert(
        self: &Self,
        source_file: &str,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let source = input_dir.join(source_file);
        let target = output_dir.join(source_file);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let source_str = path_str(&source)?;
        let target_str = path_str(&target)?;

        // Stage 1: plain copy next to the target, so overviews are built on
        // a throwaway file and the final translate can fold them in.
        let staging = target.with_extension("tmp.tif");
        let staging_str = path_str(&staging)?;
        self.run("gdal_translate", &[source_str, staging_str], &source)
            .await?;

        let mut addo_args = vec![
            "-r",
            "average",
            "--config",
            "GDAL_TIFF_OVR_BLOCKSIZE",
            "512",
            staging_str,
        ];
        addo_args.extend(OVERVIEW_LEVELS);
        self.run("gdaladdo", &addo_args, &source).await?;

        let mut translate_args = vec![
            "--config",
            "GDAL_TIFF_OVR_BLOCKSIZE",
            "512",
        ];
        for option in COG_CREATION_OPTIONS {
            translate_args.push("-co");
            translate_args.push(option);
        }
        translate_args.push(staging_str);
        translate_args.push(target_str);
        self.run("gdal_translate", &translate_args, &source).await?;

        if let Err(e) = fs::remove_file(&staging) {
            tracing::warn!("Could not remove staging file {}: {e}", staging.display());
        }
        Ok(target)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| Error::Raster {
        file: path.to_path_buf(),
        reason: "path is not valid UTF-8".to_string(),
    })
}

/// Pull bbox, footprint, CRS, pixel size and data type out of a
/// `gdalinfo -json` report.
fn parse_gdalinfo(file: &Path, report: &Value) -> Result<RasterMetadata> {
    let corner = |name: &str, axis: usize| -> Result<f64> {
        report
            .get("cornerCoordinates")
            .and_then(|c| c.get(name))
            .and_then(|c| c.get(axis))
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::Raster {
                file: file.to_path_buf(),
                reason: format!("missing cornerCoordinates.{name}"),
            })
    };
    let min_x = corner("lowerLeft", 0)?;
    let min_y = corner("lowerLeft", 1)?;
    let max_x = corner("upperRight", 0)?;
    let max_y = corner("upperRight", 1)?;
    let bbox = [min_x, min_y, max_x, max_y];

    let resolution = report
        .get("geoTransform")
        .and_then(|gt| gt.get(1))
        .and_then(Value::as_f64)
        .map(f64::abs)
        .ok_or_else(|| Error::Raster {
            file: file.to_path_buf(),
            reason: "missing geoTransform".to_string(),
        })?;

    let data_type = report
        .get("bands")
        .and_then(|b| b.get(0))
        .and_then(|b| b.get("type"))
        .and_then(Value::as_str)
        .map(normalize_data_type)
        .ok_or_else(|| Error::Raster {
            file: file.to_path_buf(),
            reason: "missing band data type".to_string(),
        })?;

    let wkt = report
        .get("coordinateSystem")
        .and_then(|cs| cs.get("wkt"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let (crs, epsg) = match extract_epsg_from_wkt(wkt) {
        Some(code) => (Crs::Code(code), Some(code)),
        None if wkt.is_empty() => (Crs::Wkt("undefined".to_string()), None),
        None => (Crs::Wkt(wkt.to_string()), None),
    };

    Ok(RasterMetadata {
        bbox,
        footprint: bbox_footprint(&bbox),
        crs,
        epsg,
        resolution,
        data_type,
    })
}

/// GDAL band types → lowercase dtype names used in item records.
fn normalize_data_type(gdal_type: &str) -> String {
    match gdal_type {
        "Byte" => "uint8".to_string(),
        "UInt16" => "uint16".to_string(),
        "Int16" => "int16".to_string(),
        "UInt32" => "uint32".to_string(),
        "Int32" => "int32".to_string(),
        "Float32" => "float32".to_string(),
        "Float64" => "float64".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

/// EPSG code from WKT1 (`AUTHORITY["EPSG","4326"]`) or WKT2
/// (`ID["EPSG",4326]`). The last occurrence belongs to the outermost
/// definition, which is the one that names the full CRS.
fn extract_epsg_from_wkt(wkt: &str) -> Option<i32> {
    let patterns = [
        r#"AUTHORITY\["EPSG","(\d+)"\]"#,
        r#"ID\["EPSG",(\d+)\]"#,
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).expect("Regex pattern should always compile");
        if let Some(captures) = re.captures_iter(wkt).last() {
            if let Ok(code) = captures[1].parse() {
                return Some(code);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> Value {
        json!({
            "cornerCoordinates": {
                "lowerLeft": [420000.0, 4100000.0],
                "upperLeft": [420000.0, 4200000.0],
                "upperRight": [520000.0, 4200000.0],
                "lowerRight": [520000.0, 4100000.0]
            },
            "geoTransform": [420000.0, 30.0, 0.0, 4200000.0, 0.0, -30.0],
            "bands": [{"band": 1, "type": "Byte"}],
            "coordinateSystem": {
                "wkt": "PROJCS[\"WGS 84 / UTM zone 30N\",GEOGCS[\"WGS 84\",\
                        AUTHORITY[\"EPSG\",\"4326\"]],AUTHORITY[\"EPSG\",\"32630\"]]"
            }
        })
    }

    #[test]
    fn test_parse_gdalinfo_report() {
        let meta = parse_gdalinfo(Path::new("cover_2010.tif"), &sample_report()).unwrap();
        assert_eq!(meta.bbox, [420000.0, 4100000.0, 520000.0, 4200000.0]);
        assert_eq!(meta.resolution, 30.0);
        assert_eq!(meta.data_type, "uint8");
        assert_eq!(meta.epsg, Some(32630));
        assert_eq!(meta.crs, Crs::Code(32630));
    }

    #[test]
    fn test_outermost_authority_wins() {
        // The inner GEOGCS carries 4326; the CRS itself is 32630.
        let wkt = sample_report()["coordinateSystem"]["wkt"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(extract_epsg_from_wkt(&wkt), Some(32630));
    }

    #[test]
    fn test_wkt2_id_form() {
        assert_eq!(
            extract_epsg_from_wkt("PROJCRS[\"x\",ID[\"EPSG\",2056]]"),
            Some(2056)
        );
    }

    #[test]
    fn test_wkt_without_authority_is_opaque() {
        let mut report = sample_report();
        report["coordinateSystem"]["wkt"] = json!("LOCAL_CS[\"arbitrary\"]");
        let meta = parse_gdalinfo(Path::new("x.tif"), &report).unwrap();
        assert_eq!(meta.epsg, None);
        assert!(matches!(meta.crs, Crs::Wkt(_)));
    }

    #[test]
    fn test_footprint_ring_is_closed() {
        let footprint = bbox_footprint(&[0.0, 0.0, 10.0, 10.0]);
        let ring = footprint["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
    }

    #[test]
    fn test_tagged_crs_parses_code() {
        assert_eq!(Crs::Tagged("EPSG:32633".to_string()).epsg(), Some(32633));
        assert_eq!(Crs::Tagged("not a code".to_string()).epsg(), None);
    }
}
