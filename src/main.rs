use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stac_publish::catalog::CatalogClient;
use stac_publish::cli::{Cli, Commands};
use stac_publish::config::Settings;
use stac_publish::inject::{rewrite_manifest, InjectOptions};
use stac_publish::raster::GdalRasterOps;
use stac_publish::storage::S3Store;
use stac_publish::sync::{self, SyncOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Create {
            ref folder,
            ref collection,
            overwrite,
            delete_local_cog,
        } => {
            let input_folder = PathBuf::from("input").join(folder);
            let output_folder = PathBuf::from("output").join(folder);
            let raster = GdalRasterOps;

            let run = sync::prepare_sync(&raster, &input_folder, collection.as_deref()).await?;

            let (username, password) = credentials(&cli)?;
            let catalog = CatalogClient::connect(&settings, username, password).await?;
            let store = S3Store::connect(&settings).await;

            run.execute(
                &catalog,
                &store,
                &raster,
                &input_folder,
                &output_folder,
                &SyncOptions {
                    overwrite,
                    delete_local: delete_local_cog,
                },
            )
            .await?;
            println!("Collection uploaded successfully.");
        }

        Commands::Validate {
            ref folder,
            ref collection,
        } => {
            let input_folder = PathBuf::from("input").join(folder);
            let raster = GdalRasterOps;
            sync::prepare_sync(&raster, &input_folder, collection.as_deref()).await?;
            println!("Validation successful.");
        }

        Commands::Remove { ref collection } => {
            let (username, password) = credentials(&cli)?;
            let catalog = CatalogClient::connect(&settings, username, password).await?;
            let store = S3Store::connect(&settings).await;
            sync::remove_collection(&catalog, &store, collection).await?;
            println!("Collection removed successfully.");
        }

        Commands::Inject {
            ref folder,
            ref output,
            no_backup,
        } => {
            let input_folder = PathBuf::from("input").join(folder);
            rewrite_manifest(
                &input_folder,
                &InjectOptions {
                    output_path: output.as_deref(),
                    make_backup: !no_backup,
                    backup_dir: None,
                },
            )?;
            println!("Collection manifest updated.");
        }
    }

    Ok(())
}

fn credentials(cli: &Cli) -> Result<(&str, &str)> {
    match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => Ok((username, password)),
        _ => Err(anyhow!(
            "username and password are required for this command (-u, -p)"
        )),
    }
}
