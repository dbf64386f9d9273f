//! Reading, validating and writing the collection manifest
//! (`<folder>/collection.json`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const MANIFEST_FILE: &str = "collection.json";

/// Declarative description of a collection: identity, narrative metadata and
/// the raster layers it is built from. Top-level fields we do not model are
/// kept verbatim in `extra` so a rewrite never loses them.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Manifest {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub items: Vec<RawItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RawItem {
    pub id: String,
    pub year: String,
    pub assets: RawAssets,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RawAssets {
    pub input_file: String,
}

impl Manifest {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let manifest: Self = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidManifest(e.to_string()))?;
        Ok(manifest)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Structural checks beyond what deserialization enforces. The
    /// `metadata` block is passed to the catalog verbatim, but when it
    /// declares a data type its legend must be coherent.
    pub fn validate(self: &Self) -> Result<()> {
        let Some(metadata) = &self.metadata else {
            return Ok(());
        };

        let data_type = metadata
            .get("data_type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidManifest("metadata.data_type is missing or not a string".to_string())
            })?;

        match data_type {
            "classified" => validate_classified(metadata),
            "continuous" => validate_continuous(metadata),
            other => Err(Error::InvalidManifest(format!(
                "metadata.data_type must be 'classified' or 'continuous', got '{other}'"
            ))),
        }
    }
}

fn legend_array<'a>(metadata: &'a Value, name: &str) -> Result<&'a Vec<Value>> {
    metadata
        .get("properties")
        .and_then(|p| p.get(name))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            Error::InvalidManifest(format!("metadata.properties.{name} is missing or not a list"))
        })
}

fn validate_classified(metadata: &Value) -> Result<()> {
    let values = legend_array(metadata, "values")?;
    let colors = legend_array(metadata, "colors")?;
    let classes = legend_array(metadata, "classes")?;

    if values.len() != colors.len() || colors.len() != classes.len() {
        return Err(Error::InvalidManifest(
            "metadata.properties values/colors/classes must have the same length".to_string(),
        ));
    }
    Ok(())
}

fn validate_continuous(metadata: &Value) -> Result<()> {
    let has_class = metadata
        .get("properties")
        .map(|p| p.get("class").is_some())
        .unwrap_or(false);
    if !has_class {
        return Err(Error::InvalidManifest(
            "metadata.properties.class is required for continuous collections".to_string(),
        ));
    }

    if legend_array(metadata, "colors")?.len() != 3 {
        return Err(Error::InvalidManifest(
            "metadata.properties.colors must have 3 elements".to_string(),
        ));
    }
    if legend_array(metadata, "values")?.len() != 2 {
        return Err(Error::InvalidManifest(
            "metadata.properties.values must have 2 elements".to_string(),
        ));
    }
    Ok(())
}

/// Check that the input folder exists and contains a manifest; returns the
/// manifest path.
pub fn validate_input_folder(folder: &Path) -> Result<PathBuf> {
    let manifest_path = folder.join(MANIFEST_FILE);
    if !folder.is_dir() || !manifest_path.is_file() {
        return Err(Error::FolderNotFound(folder.to_path_buf()));
    }
    Ok(manifest_path)
}

/// Check that every layer file referenced by the manifest exists.
pub fn validate_layers(folder: &Path, items: &[RawItem]) -> Result<()> {
    for item in items {
        let file_path = folder.join(&item.assets.input_file);
        if !file_path.is_file() {
            return Err(Error::LayerMissing(file_path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_manifest_json() -> Value {
        json!({
            "id": "land-cover",
            "title": "Land Cover",
            "description": "Yearly land cover layers",
            "license": "CC-BY-4.0",
            "items": [
                {"id": "2010", "year": "2010", "assets": {"input_file": "cover_2010.tif"}}
            ]
        })
    }

    #[test]
    fn test_read_write_round_trip_preserves_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, sample_manifest_json().to_string()).unwrap();

        let manifest = Manifest::read(&path).unwrap();
        assert_eq!(manifest.id, "land-cover");
        assert_eq!(manifest.items.len(), 1);
        // "license" is not a modeled field but must survive a round trip
        assert_eq!(manifest.extra.get("license").unwrap(), "CC-BY-4.0");

        manifest.write(&path).unwrap();
        let reread: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread.get("license").unwrap(), "CC-BY-4.0");
    }

    #[test]
    fn test_invalid_manifest_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, "{\"id\": \"x\"}").unwrap();

        match Manifest::read(&path) {
            Err(Error::InvalidManifest(_)) => {}
            other => panic!("expected InvalidManifest, got {:?}", other.map(|m| m.id)),
        }
    }

    #[test]
    fn test_classified_metadata_lengths_must_match() {
        let mut value = sample_manifest_json();
        value["metadata"] = json!({
            "data_type": "classified",
            "properties": {
                "values": [1, 2, 3],
                "colors": ["#000000", "#ffffff"],
                "classes": ["water", "forest", "urban"]
            }
        });
        let manifest: Manifest = serde_json::from_value(value).unwrap();
        assert!(matches!(
            manifest.validate(),
            Err(Error::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_continuous_metadata_accepted() {
        let mut value = sample_manifest_json();
        value["metadata"] = json!({
            "data_type": "continuous",
            "properties": {
                "class": "ndvi",
                "values": [0.0, 1.0],
                "colors": ["#440154", "#21918c", "#fde725"]
            }
        });
        let manifest: Manifest = serde_json::from_value(value).unwrap();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_input_folder_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_input_folder(dir.path()),
            Err(Error::FolderNotFound(_))
        ));
    }

    #[test]
    fn test_validate_layers_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let manifest: Manifest = serde_json::from_value(sample_manifest_json()).unwrap();
        assert!(matches!(
            validate_layers(dir.path(), &manifest.items),
            Err(Error::LayerMissing(_))
        ));
    }
}
