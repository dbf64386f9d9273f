use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Input folder {0} does not exist or does not contain collection.json")]
    FolderNotFound(PathBuf),

    #[error("Layer file referenced by the manifest does not exist: {0}")]
    LayerMissing(PathBuf),

    #[error("Invalid collection manifest: {0}")]
    InvalidManifest(String),

    #[error("No .tif files found in {0}")]
    NoRasterFiles(PathBuf),

    #[error(
        "'{0}' does not contain a 4-digit year or year range. \
         Rename the file or adjust the detection pattern."
    )]
    UnparseableFilename(String),

    #[error("Duplicate item id '{0}' derived from .tif files")]
    DuplicateItemId(String),

    #[error("Item {id} has an invalid year '{year}'")]
    InvalidYear { id: String, year: String },

    #[error("Cannot build a collection from an empty item set")]
    EmptyItemSet,

    #[error("Invalid collection record: {0}")]
    InvalidRecord(String),

    #[error("Missing proj:epsg for item {id} (file: {file}, CRS: {crs})")]
    EpsgUnresolved {
        id: String,
        file: PathBuf,
        crs: String,
    },

    #[error(
        "Collection {0} already exists.\n\
         To overwrite it, rerun the program with the -o parameter."
    )]
    CollectionExists(String),

    #[error("Raster operation failed for {file}: {reason}")]
    Raster { file: PathBuf, reason: String },

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Catalog request to {url} failed with status {status}")]
    CatalogStatus { url: String, status: u16 },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
