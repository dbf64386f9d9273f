//! Rewrites the manifest's `items` array from the raster files on disk,
//! leaving every other manifest field untouched.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::Map;
use tracing::info;

use crate::error::{Error, Result};
use crate::items;
use crate::manifest::{self, Manifest, RawAssets, RawItem};

pub struct InjectOptions<'a> {
    /// Where to write the result; defaults to overwriting the input manifest.
    pub output_path: Option<&'a Path>,
    pub make_backup: bool,
    /// Where backups go; defaults next to the output, else the input folder.
    pub backup_dir: Option<&'a Path>,
}

/// Derive a fresh item list from the folder's raster filenames and write the
/// updated manifest. Returns the path written.
pub fn rewrite_manifest(input_folder: &Path, options: &InjectOptions<'_>) -> Result<PathBuf> {
    let manifest_path = manifest::validate_input_folder(input_folder)?;
    info!("Reading base collection from: {}", manifest_path.display());

    let original_content = fs::read_to_string(&manifest_path)?;
    let mut base: Manifest = serde_json::from_str(&original_content)
        .map_err(|e| Error::InvalidManifest(e.to_string()))?;

    let mut tif_files: Vec<String> = fs::read_dir(input_folder)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.to_lowercase().ends_with(".tif"))
        .collect();
    if tif_files.is_empty() {
        return Err(Error::NoRasterFiles(input_folder.to_path_buf()));
    }
    tif_files.sort();
    info!(
        "Found {} .tif files in {}",
        tif_files.len(),
        input_folder.display()
    );

    let descriptors = items::from_filenames(&tif_files)?;
    base.items = descriptors
        .into_iter()
        .map(|d| RawItem {
            id: d.id,
            year: d.year,
            assets: RawAssets {
                input_file: d.source_file,
            },
            properties: Map::new(),
        })
        .collect();

    let target_path = options
        .output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| manifest_path.clone());

    if options.make_backup {
        let backup_path = write_backup(
            &original_content,
            input_folder,
            options.backup_dir,
            options.output_path,
        )?;
        info!("Backup saved at: {}", backup_path.display());
    }

    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent)?;
    }
    base.write(&target_path)?;
    info!("Collection manifest updated at: {}", target_path.display());

    Ok(target_path)
}

fn write_backup(
    original_content: &str,
    input_folder: &Path,
    backup_dir: Option<&Path>,
    output_path: Option<&Path>,
) -> Result<PathBuf> {
    let dest_dir = match (backup_dir, output_path) {
        (Some(dir), _) => dir.to_path_buf(),
        (None, Some(output)) => output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf(),
        (None, None) => input_folder.to_path_buf(),
    };
    fs::create_dir_all(&dest_dir)?;

    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let backup_path = dest_dir.join(format!("collection.backup.{timestamp}.json"));
    fs::write(&backup_path, original_content)?;
    Ok(backup_path)
}
