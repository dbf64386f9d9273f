//! Resolves geometric metadata and a spatial-reference identifier for each
//! item descriptor. Enrichment happens exactly once, before any conversion
//! or upload, and fails fast when the identifier cannot be determined.

use std::path::Path;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::items::{year_end, ItemDescriptor};
use crate::raster::{Crs, RasterMetadata, RasterOps};

pub const PROJ_EPSG_KEY: &str = "proj:epsg";

/// Descriptor plus the fields filled in from the raster source.
#[derive(Debug, Clone)]
pub struct EnrichedItem {
    pub descriptor: ItemDescriptor,
    pub bbox: [f64; 4],
    pub footprint: Value,
    pub crs: Crs,
    pub resolution: f64,
    pub data_type: String,
    /// End-of-year timestamp for the item's representative year.
    pub datetime: NaiveDate,
    pub epsg: i32,
}

/// Outcome of the spatial-reference resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpsgResolution {
    /// A positive identifier was already present in the item's properties.
    AlreadyPresent(i32),
    /// Determined from the raster source; must be written back.
    Resolved(i32),
    Unresolved,
}

/// First success wins: existing positive property, provider-native code,
/// identifier embedded in the CRS descriptor.
pub fn resolve_epsg(properties: &Map<String, Value>, metadata: &RasterMetadata) -> EpsgResolution {
    if let Some(existing) = properties.get(PROJ_EPSG_KEY).and_then(Value::as_i64) {
        if existing > 0 {
            return EpsgResolution::AlreadyPresent(existing as i32);
        }
    }

    let computed = metadata.epsg.or_else(|| metadata.crs.epsg());
    match computed {
        Some(code) if code > 0 => EpsgResolution::Resolved(code),
        _ => EpsgResolution::Unresolved,
    }
}

/// Enrich every descriptor in order. Returns the items with geometry,
/// timestamps and a guaranteed-positive `proj:epsg` in their properties.
pub async fn enrich_items(
    raster: &impl RasterOps,
    folder: &Path,
    descriptors: Vec<ItemDescriptor>,
) -> Result<Vec<EnrichedItem>> {
    let mut enriched = Vec::with_capacity(descriptors.len());

    for mut descriptor in descriptors {
        let file_path = folder.join(&descriptor.source_file);
        info!("Retrieving metadata from file: {}", file_path.display());
        let metadata = raster.metadata(&file_path).await?;

        let epsg = match resolve_epsg(&descriptor.properties, &metadata) {
            EpsgResolution::AlreadyPresent(code) => {
                info!("Keeping existing proj:epsg={code} for item {}", descriptor.id);
                code
            }
            EpsgResolution::Resolved(code) => {
                info!("Computed proj:epsg={code} for item {}", descriptor.id);
                descriptor
                    .properties
                    .insert(PROJ_EPSG_KEY.to_string(), json!(code));
                code
            }
            EpsgResolution::Unresolved => {
                return Err(Error::EpsgUnresolved {
                    id: descriptor.id,
                    file: file_path,
                    crs: metadata.crs.to_string(),
                });
            }
        };

        let year = descriptor.year_number()?;
        enriched.push(EnrichedItem {
            datetime: year_end(year),
            bbox: metadata.bbox,
            footprint: metadata.footprint,
            crs: metadata.crs,
            resolution: metadata.resolution,
            data_type: metadata.data_type,
            epsg,
            descriptor,
        });
    }

    Ok(enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::bbox_footprint;
    use std::path::PathBuf;

    struct FixedRaster {
        metadata: RasterMetadata,
    }

    impl RasterOps for FixedRaster {
        async fn metadata(self: &Self, _file_path: &Path) -> Result<RasterMetadata> {
            Ok(self.metadata.clone())
        }

        async fn convert(
            self: &Self,
            _source_file: &str,
            _input_dir: &Path,
            output_dir: &Path,
        ) -> Result<PathBuf> {
            Ok(output_dir.to_path_buf())
        }
    }

    fn metadata_with(crs: Crs, epsg: Option<i32>) -> RasterMetadata {
        let bbox = [0.0, 0.0, 10.0, 10.0];
        RasterMetadata {
            bbox,
            footprint: bbox_footprint(&bbox),
            crs,
            epsg,
            resolution: 30.0,
            data_type: "uint8".to_string(),
        }
    }

    fn descriptor(properties: Map<String, Value>) -> ItemDescriptor {
        ItemDescriptor {
            id: "2010".to_string(),
            year: "2010".to_string(),
            source_file: "cover_2010.tif".to_string(),
            properties,
        }
    }

    #[test]
    fn test_existing_property_beats_provider_code() {
        let mut properties = Map::new();
        properties.insert(PROJ_EPSG_KEY.to_string(), json!(25830));
        let metadata = metadata_with(Crs::Code(4326), Some(4326));
        assert_eq!(
            resolve_epsg(&properties, &metadata),
            EpsgResolution::AlreadyPresent(25830)
        );
    }

    #[test]
    fn test_non_positive_property_is_ignored() {
        let mut properties = Map::new();
        properties.insert(PROJ_EPSG_KEY.to_string(), json!(0));
        let metadata = metadata_with(Crs::Code(4326), Some(4326));
        assert_eq!(
            resolve_epsg(&properties, &metadata),
            EpsgResolution::Resolved(4326)
        );
    }

    #[test]
    fn test_provider_code_beats_descriptor() {
        let metadata = metadata_with(Crs::Tagged("EPSG:32633".to_string()), Some(4326));
        assert_eq!(
            resolve_epsg(&Map::new(), &metadata),
            EpsgResolution::Resolved(4326)
        );
    }

    #[test]
    fn test_tagged_descriptor_code_is_parsed() {
        let metadata = metadata_with(Crs::Tagged("EPSG:32633".to_string()), None);
        assert_eq!(
            resolve_epsg(&Map::new(), &metadata),
            EpsgResolution::Resolved(32633)
        );
    }

    #[test]
    fn test_bare_code_descriptor_is_used_directly() {
        let metadata = metadata_with(Crs::Code(3035), None);
        assert_eq!(
            resolve_epsg(&Map::new(), &metadata),
            EpsgResolution::Resolved(3035)
        );
    }

    #[test]
    fn test_opaque_wkt_is_unresolved() {
        let metadata = metadata_with(Crs::Wkt("LOCAL_CS[\"arbitrary\"]".to_string()), None);
        assert_eq!(resolve_epsg(&Map::new(), &metadata), EpsgResolution::Unresolved);
    }

    #[tokio::test]
    async fn test_enrich_writes_resolved_code_back() {
        let raster = FixedRaster {
            metadata: metadata_with(Crs::Code(32630), Some(32630)),
        };
        let enriched = enrich_items(&raster, Path::new("input"), vec![descriptor(Map::new())])
            .await
            .unwrap();

        assert_eq!(enriched[0].epsg, 32630);
        assert_eq!(
            enriched[0].descriptor.properties.get(PROJ_EPSG_KEY),
            Some(&json!(32630))
        );
        assert_eq!(
            enriched[0].datetime,
            NaiveDate::from_ymd_opt(2010, 12, 31).unwrap()
        );
    }

    #[tokio::test]
    async fn test_enrich_fails_fast_when_unresolved() {
        let raster = FixedRaster {
            metadata: metadata_with(Crs::Wkt("ENGCRS[\"engineering\"]".to_string()), None),
        };
        let result = enrich_items(&raster, Path::new("input"), vec![descriptor(Map::new())]).await;
        match result {
            Err(Error::EpsgUnresolved { id, .. }) => assert_eq!(id, "2010"),
            other => panic!("expected EpsgUnresolved, got {:?}", other.is_ok()),
        }
    }
}
