//! The catalog records derived from an enriched item set: one collection
//! aggregate and one item record per layer.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::enrich::{EnrichedItem, PROJ_EPSG_KEY};
use crate::error::{Error, Result};
use crate::items::{year_end, year_start};
use crate::manifest::Manifest;

pub const STAC_VERSION: &str = "1.0.0";
pub const PROJECTION_EXTENSION: &str =
    "https://stac-extensions.github.io/projection/v1.0.0/schema.json";
pub const COG_MEDIA_TYPE: &str = "image/tiff; application=geotiff; profile=cloud-optimized";
const DEFAULT_LICENSE: &str = "proprietary";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SpatialExtent {
    pub bbox: Vec<[f64; 4]>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TemporalExtent {
    pub interval: Vec<[Option<String>; 2]>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Extent {
    pub spatial: SpatialExtent,
    pub temporal: TemporalExtent,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CollectionRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub stac_version: String,
    pub id: String,
    pub title: String,
    pub description: String,
    pub license: String,
    pub extent: Extent,
    pub links: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summaries: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AssetRecord {
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ItemRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub stac_version: String,
    pub stac_extensions: Vec<String>,
    pub id: String,
    pub geometry: Value,
    pub bbox: [f64; 4],
    pub properties: Map<String, Value>,
    pub links: Vec<Value>,
    pub assets: BTreeMap<String, AssetRecord>,
    pub collection: String,
}

impl ItemRecord {
    /// Attach an uploaded layer as a COG asset.
    pub fn attach_asset(&mut self, key: &str, href: &str) {
        self.assets.insert(
            key.to_string(),
            AssetRecord {
                href: href.to_string(),
                media_type: Some(COG_MEDIA_TYPE.to_string()),
            },
        );
    }
}

impl CollectionRecord {
    /// Structural self-validation; runs before any network call.
    pub fn validate(self: &Self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidRecord("collection id is empty".to_string()));
        }
        let [min_x, min_y, max_x, max_y] = self
            .extent
            .spatial
            .bbox
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidRecord("spatial extent is empty".to_string()))?;
        if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidRecord(
                "spatial extent has non-finite coordinates".to_string(),
            ));
        }
        if min_x > max_x || min_y > max_y {
            return Err(Error::InvalidRecord(
                "spatial extent is not min/max ordered".to_string(),
            ));
        }
        match self.extent.temporal.interval.first() {
            Some([Some(start), Some(end)]) if start <= end => Ok(()),
            _ => Err(Error::InvalidRecord(
                "temporal extent is missing or reversed".to_string(),
            )),
        }
    }
}

fn datetime_utc(date: NaiveDate) -> String {
    format!("{date}T00:00:00Z")
}

/// Fold the enriched items into the immutable collection aggregate:
/// componentwise bbox union and the [Jan 1 of min year, Dec 31 of max year]
/// interval. The item set must be non-empty.
pub fn build_collection(
    collection_name: Option<&str>,
    manifest: &Manifest,
    items: &[EnrichedItem],
) -> Result<CollectionRecord> {
    if items.is_empty() {
        return Err(Error::EmptyItemSet);
    }

    let mut union = items[0].bbox;
    for item in &items[1..] {
        union[0] = union[0].min(item.bbox[0]);
        union[1] = union[1].min(item.bbox[1]);
        union[2] = union[2].max(item.bbox[2]);
        union[3] = union[3].max(item.bbox[3]);
    }

    let mut years = Vec::with_capacity(items.len());
    for item in items {
        years.push(item.descriptor.year_number()?);
    }
    let start_year = *years.iter().min().expect("item set is non-empty");
    let end_year = *years.iter().max().expect("item set is non-empty");

    let id = collection_name.unwrap_or(&manifest.id).to_string();
    let license = manifest
        .extra
        .get("license")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_LICENSE)
        .to_string();

    let record = CollectionRecord {
        kind: "Collection".to_string(),
        stac_version: STAC_VERSION.to_string(),
        id,
        title: manifest.title.clone(),
        description: manifest.description.clone(),
        license,
        extent: Extent {
            spatial: SpatialExtent { bbox: vec![union] },
            temporal: TemporalExtent {
                interval: vec![[
                    Some(datetime_utc(year_start(start_year))),
                    Some(datetime_utc(year_end(end_year))),
                ]],
            },
        },
        links: vec![],
        summaries: resolution_summary(items),
        metadata: manifest.metadata.clone(),
    };

    record.validate()?;
    Ok(record)
}

/// Sorted, de-duplicated pixel resolutions across the item set. Best-effort:
/// a non-finite resolution drops the summary with a warning, never the run.
fn resolution_summary(items: &[EnrichedItem]) -> Option<Map<String, Value>> {
    let mut resolutions: Vec<f64> = items.iter().map(|i| i.resolution).collect();
    if resolutions.iter().any(|r| !r.is_finite()) {
        warn!("Skipping resolution summary: non-finite pixel resolution reported");
        return None;
    }
    resolutions.sort_by(|a, b| a.partial_cmp(b).expect("finite floats are ordered"));
    resolutions.dedup();

    let mut summaries = Map::new();
    summaries.insert("gsd".to_string(), json!(resolutions));
    Some(summaries)
}

/// One STAC item record per enriched item, in the given (year-ascending)
/// order. Assets are attached later, as layers are uploaded.
pub fn build_items(collection_id: &str, items: &[EnrichedItem]) -> Vec<ItemRecord> {
    items
        .iter()
        .map(|item| {
            let mut properties = item.descriptor.properties.clone();
            properties.insert(PROJ_EPSG_KEY.to_string(), json!(item.epsg));
            properties.insert("datetime".to_string(), json!(datetime_utc(item.datetime)));

            ItemRecord {
                kind: "Feature".to_string(),
                stac_version: STAC_VERSION.to_string(),
                stac_extensions: vec![PROJECTION_EXTENSION.to_string()],
                id: item.descriptor.id.clone(),
                geometry: item.footprint.clone(),
                bbox: item.bbox,
                properties,
                links: vec![],
                assets: BTreeMap::new(),
                collection: collection_id.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::ItemDescriptor;
    use crate::raster::{bbox_footprint, Crs};

    fn enriched(id: &str, year: i32, bbox: [f64; 4], resolution: f64) -> EnrichedItem {
        EnrichedItem {
            descriptor: ItemDescriptor {
                id: id.to_string(),
                year: year.to_string(),
                source_file: format!("{id}.tif"),
                properties: Map::new(),
            },
            bbox,
            footprint: bbox_footprint(&bbox),
            crs: Crs::Code(4326),
            resolution,
            data_type: "uint8".to_string(),
            datetime: year_end(year),
            epsg: 4326,
        }
    }

    fn manifest() -> Manifest {
        serde_json::from_value(json!({
            "id": "land-cover",
            "title": "Land Cover",
            "description": "Yearly land cover layers"
        }))
        .unwrap()
    }

    #[test]
    fn test_extents_cover_all_items() {
        let items = vec![
            enriched("2010", 2010, [0.0, 0.0, 10.0, 10.0], 30.0),
            enriched("2015", 2015, [5.0, 5.0, 15.0, 15.0], 30.0),
        ];
        let record = build_collection(None, &manifest(), &items).unwrap();

        assert_eq!(record.extent.spatial.bbox, vec![[0.0, 0.0, 15.0, 15.0]]);
        assert_eq!(
            record.extent.temporal.interval,
            vec![[
                Some("2010-01-01T00:00:00Z".to_string()),
                Some("2015-12-31T00:00:00Z".to_string()),
            ]]
        );
        assert_eq!(record.id, "land-cover");
    }

    #[test]
    fn test_explicit_name_overrides_manifest_id() {
        let items = vec![enriched("2010", 2010, [0.0, 0.0, 1.0, 1.0], 30.0)];
        let record = build_collection(Some("override"), &manifest(), &items).unwrap();
        assert_eq!(record.id, "override");
    }

    #[test]
    fn test_empty_item_set_is_a_hard_precondition() {
        assert!(matches!(
            build_collection(None, &manifest(), &[]),
            Err(Error::EmptyItemSet)
        ));
    }

    #[test]
    fn test_resolution_summary_is_sorted_and_deduplicated() {
        let items = vec![
            enriched("2010", 2010, [0.0, 0.0, 1.0, 1.0], 30.0),
            enriched("2012", 2012, [0.0, 0.0, 1.0, 1.0], 10.0),
            enriched("2015", 2015, [0.0, 0.0, 1.0, 1.0], 30.0),
        ];
        let record = build_collection(None, &manifest(), &items).unwrap();
        let gsd = &record.summaries.unwrap()["gsd"];
        assert_eq!(gsd, &json!([10.0, 30.0]));
    }

    #[test]
    fn test_non_finite_resolution_only_drops_the_summary() {
        let items = vec![enriched("2010", 2010, [0.0, 0.0, 1.0, 1.0], f64::NAN)];
        let record = build_collection(None, &manifest(), &items).unwrap();
        assert!(record.summaries.is_none());
    }

    #[test]
    fn test_item_records_carry_datetime_epsg_and_extension() {
        let items = vec![enriched("2010", 2010, [0.0, 0.0, 1.0, 1.0], 30.0)];
        let records = build_items("land-cover", &items);

        let record = &records[0];
        assert_eq!(record.properties["datetime"], json!("2010-12-31T00:00:00Z"));
        assert_eq!(record.properties[PROJ_EPSG_KEY], json!(4326));
        assert_eq!(record.stac_extensions, vec![PROJECTION_EXTENSION.to_string()]);
        assert_eq!(record.collection, "land-cover");
    }

    #[test]
    fn test_attach_asset_uses_cog_media_type() {
        let items = vec![enriched("2010", 2010, [0.0, 0.0, 1.0, 1.0], 30.0)];
        let mut record = build_items("land-cover", &items).remove(0);
        record.attach_asset("2010", "https://bucket.s3.us-east-1.amazonaws.com/land-cover/a.tif");

        let asset = &record.assets["2010"];
        assert_eq!(asset.media_type.as_deref(), Some(COG_MEDIA_TYPE));
    }

    #[test]
    fn test_validate_rejects_reversed_bbox() {
        let items = vec![enriched("2010", 2010, [0.0, 0.0, 1.0, 1.0], 30.0)];
        let mut record = build_collection(None, &manifest(), &items).unwrap();
        record.extent.spatial.bbox = vec![[5.0, 0.0, 1.0, 1.0]];
        assert!(matches!(record.validate(), Err(Error::InvalidRecord(_))));
    }
}
