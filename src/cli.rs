use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "stac-publish", about = "STAC collection manager", version)]
pub struct Cli {
    /// Username for catalog authentication
    #[arg(short, long, global = true)]
    pub username: Option<String>,

    /// Password for catalog authentication
    #[arg(short, long, global = true)]
    pub password: Option<String>,

    /// Settings file (TOML); defaults and environment variables apply otherwise
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a STAC collection from input/<folder> and upload it
    Create {
        /// Input folder under 'input/' containing collection.json and data layers
        #[arg(short, long, value_name = "FOLDER_NAME")]
        folder: String,

        /// Collection name; if omitted, the 'id' from collection.json is used
        #[arg(short, long, value_name = "COLLECTION_NAME")]
        collection: Option<String>,

        /// Overwrite the existing collection if it already exists
        #[arg(short, long)]
        overwrite: bool,

        /// Delete local COGs from output/<folder> after a successful upload;
        /// an emptied output folder is removed as well
        #[arg(long)]
        delete_local_cog: bool,
    },

    /// Validate the folder structure and collection.json without converting
    /// or uploading anything
    Validate {
        /// Input folder under 'input/' containing collection.json and data layers
        #[arg(short, long, value_name = "FOLDER_NAME")]
        folder: String,

        /// Collection name to validate; defaults to the manifest id
        #[arg(short, long, value_name = "COLLECTION_NAME")]
        collection: Option<String>,
    },

    /// Remove a collection from the catalog and its layers from storage
    Remove {
        /// Collection name to remove
        #[arg(short, long, value_name = "COLLECTION_NAME")]
        collection: String,
    },

    /// Rewrite the 'items' array of collection.json from .tif filenames.
    /// Filenames must carry a year (2005) or a period (2000-2005, 2000_2005).
    Inject {
        /// Folder under 'input/' containing collection.json and .tif files
        #[arg(short, long, value_name = "FOLDER_NAME")]
        folder: String,

        /// Optional output path (default: overwrite the input collection.json)
        #[arg(short = 'O', long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Do not create a backup when overwriting collection.json
        #[arg(long)]
        no_backup: bool,
    },
}
