//! The collection build-and-sync orchestrator: existence gate, conditional
//! remove, idempotent conversion, layer/record upload and best-effort
//! rollback of uploaded blobs when a later step fails.

use std::fs;
use std::path::Path;

use tracing::{error, info, warn};

use crate::catalog::{CatalogOps, Resource};
use crate::enrich::{self, EnrichedItem};
use crate::error::{Error, Result};
use crate::items;
use crate::manifest::{self, Manifest};
use crate::raster::RasterOps;
use crate::records::{self, build_items, CollectionRecord, ItemRecord};
use crate::storage::ObjectStoreOps;

/// Compensation log for one run: every blob URL written to the object store,
/// in upload order. Drained (most recent first) if the run aborts after the
/// first upload; simply dropped on success.
#[derive(Debug, Default)]
pub struct UploadLedger {
    urls: Vec<String>,
}

impl UploadLedger {
    pub fn record(&mut self, url: String) {
        self.urls.push(url);
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Best-effort delete of every recorded blob, most recent first.
    /// Failures are collected and logged; they never mask the error that
    /// triggered the drain.
    pub async fn drain(&mut self, store: &impl ObjectStoreOps) -> Vec<(String, Error)> {
        let mut failures = vec![];
        while let Some(url) = self.urls.pop() {
            match store.remove(&url).await {
                Ok(()) => info!("Removed uploaded file: {url}"),
                Err(e) => {
                    error!("Error cleaning up uploaded file {url}: {e}");
                    failures.push((url, e));
                }
            }
        }
        failures
    }
}

pub struct SyncOptions {
    pub overwrite: bool,
    pub delete_local: bool,
}

/// Everything the orchestrator needs for one collection run: the validated
/// aggregate, the enriched items in year order, and their catalog records.
pub struct CollectionSync {
    pub record: CollectionRecord,
    items: Vec<EnrichedItem>,
    pub stac_items: Vec<ItemRecord>,
    ledger: UploadLedger,
}

/// Validate the input folder and manifest, derive and enrich the item set,
/// and build the collection aggregate. No network side effects.
pub async fn prepare_sync(
    raster: &impl RasterOps,
    input_folder: &Path,
    collection_name: Option<&str>,
) -> Result<CollectionSync> {
    let manifest_path = manifest::validate_input_folder(input_folder)?;
    let manifest = Manifest::read(&manifest_path)?;
    manifest.validate()?;
    manifest::validate_layers(input_folder, &manifest.items)?;

    info!("Loading items from {}", input_folder.display());
    let descriptors = items::from_manifest(&manifest.items)?;
    let enriched = enrich::enrich_items(raster, input_folder, descriptors).await?;
    let record = records::build_collection(collection_name, &manifest, &enriched)?;
    info!("Collection {} validated successfully", record.id);

    Ok(CollectionSync::new(record, enriched))
}

impl CollectionSync {
    pub fn new(record: CollectionRecord, items: Vec<EnrichedItem>) -> Self {
        let stac_items = build_items(&record.id, &items);
        CollectionSync {
            record,
            items,
            stac_items,
            ledger: UploadLedger::default(),
        }
    }

    /// Run the full state machine against the remote catalog and store.
    pub async fn execute(
        mut self,
        catalog: &impl CatalogOps,
        store: &impl ObjectStoreOps,
        raster: &impl RasterOps,
        input_dir: &Path,
        output_dir: &Path,
        options: &SyncOptions,
    ) -> Result<()> {
        match catalog.collection_state(&self.record.id).await? {
            Resource::Exists if !options.overwrite => {
                return Err(Error::CollectionExists(self.record.id.clone()));
            }
            Resource::Exists => {
                remove_collection(catalog, store, &self.record.id).await?;
                info!("Previous collection removed");
            }
            Resource::NotFound => {}
        }

        // Conversion happens before any upload; a failure here needs no
        // compensation.
        self.convert_layers(raster, input_dir, output_dir).await?;

        if let Err(primary) = self.upload(catalog, store, output_dir).await {
            let failures = self.ledger.drain(store).await;
            if !failures.is_empty() {
                error!(
                    "Rollback incomplete: {} blob(s) could not be deleted",
                    failures.len()
                );
            }
            return Err(primary);
        }

        if options.delete_local {
            cleanup_local(&self.items, output_dir);
        }
        Ok(())
    }

    /// Convert every layer into the output folder. Layers whose target file
    /// already exists are skipped, so re-runs do not reconvert.
    pub async fn convert_layers(
        &self,
        raster: &impl RasterOps,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<()> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir)?;
            info!("Directory created: {}", output_dir.display());
        }

        for item in &self.items {
            let source_file = &item.descriptor.source_file;
            let target = output_dir.join(source_file);
            if target.exists() {
                info!("Skipping conversion of {source_file}: target already exists");
                continue;
            }
            info!("Converting {source_file} to COG");
            raster.convert(source_file, input_dir, output_dir).await?;
            info!("Conversion of {source_file} completed");
        }
        Ok(())
    }

    async fn upload(
        &mut self,
        catalog: &impl CatalogOps,
        store: &impl ObjectStoreOps,
        output_dir: &Path,
    ) -> Result<()> {
        self.upload_layers(store, output_dir).await?;

        info!("Uploading collection {}", self.record.id);
        catalog.put_collection(&self.record).await?;
        info!("Collection {} uploaded successfully", self.record.id);

        for item in &self.stac_items {
            catalog.put_item(&self.record.id, item).await?;
            info!("Item {} uploaded", item.id);
        }
        Ok(())
    }

    /// Upload each converted layer, record it in the ledger, attach it as an
    /// asset on its item record, and reclaim the local file. The local delete
    /// is irreversible: a later abort rolls back blobs, not local files.
    async fn upload_layers(&mut self, store: &impl ObjectStoreOps, output_dir: &Path) -> Result<()> {
        for (i, item) in self.items.iter().enumerate() {
            let source_file = &item.descriptor.source_file;
            let file_path = output_dir.join(source_file);
            let key = format!("{}/{}", self.record.id, source_file);

            info!("Uploading {source_file}");
            let url = store.upload(&key, &file_path).await?;
            self.ledger.record(url.clone());
            self.stac_items[i].attach_asset(&item.descriptor.id, &url);

            if let Err(e) = fs::remove_file(&file_path) {
                warn!("Could not remove local file {}: {e}", file_path.display());
            }
        }
        Ok(())
    }
}

/// Remove a collection from the catalog and every asset blob its items
/// reference from the object store. Blobs go first, so a failure leaves the
/// collection record (and another run can retry the removal).
pub async fn remove_collection(
    catalog: &impl CatalogOps,
    store: &impl ObjectStoreOps,
    collection_id: &str,
) -> Result<()> {
    info!("Attempting to remove collection {collection_id}");

    let remote_items = catalog.collection_items(collection_id).await?;
    for item in &remote_items.items {
        for asset in item.assets.values() {
            info!("Deleting file {} from object storage", asset.href);
            store.remove(&asset.href).await?;
        }
    }

    catalog.delete_collection(collection_id).await?;
    info!("Collection {collection_id} removed successfully");
    Ok(())
}

/// Delete local converted files and prune the output directory if it ends up
/// empty. Never fatal.
pub fn cleanup_local(items: &[EnrichedItem], output_dir: &Path) {
    for item in items {
        let file_path = output_dir.join(&item.descriptor.source_file);
        if !file_path.exists() {
            continue;
        }
        match fs::remove_file(&file_path) {
            Ok(()) => info!("Removed local file {}", file_path.display()),
            Err(e) => warn!("Could not remove local file {}: {e}", file_path.display()),
        }
    }

    let is_empty = fs::read_dir(output_dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        match fs::remove_dir(output_dir) {
            Ok(()) => info!("Removed empty output directory {}", output_dir.display()),
            Err(e) => warn!("Could not remove {}: {e}", output_dir.display()),
        }
    }
}
