use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use url::Url;

use geopin::album::{AlbumOutcome, AlbumSyncService, PrefetchResult};
use geopin::cache::ImageCache;
use geopin::config::Config;
use geopin::flickr::SearchClient;
use geopin::store::{Pin, PinStore, StoreOp};

#[derive(Parser)]
#[command(author, version, about = "Drop map pins and collect photo albums for them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Drop a new pin at a coordinate
    Drop {
        /// Latitude of the pin, in degrees
        #[arg(allow_negative_numbers = true)]
        latitude: f64,

        /// Longitude of the pin, in degrees
        #[arg(allow_negative_numbers = true)]
        longitude: f64,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// List all pins
    Pins {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Fetch the photo album for a pin (no-op if it already has one)
    Album {
        /// Id of the pin
        pin: String,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Discard a pin's album and fetch a fresh one
    Refresh {
        /// Id of the pin
        pin: String,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Remove one photo from a pin's album
    Discard {
        /// Id of the pin
        pin: String,

        /// Id of the photo to remove
        photo: String,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Delete a pin and its whole album
    Forget {
        /// Id of the pin
        pin: String,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Show pins, albums and cache status
    Status {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force, config } => init_config(config, *force),
        Commands::Drop {
            latitude,
            longitude,
            config,
        } => {
            let config = load_config(config)?;
            drop_pin(&config, *latitude, *longitude)
        }
        Commands::Pins { config } => {
            let config = load_config(config)?;
            list_pins(&config)
        }
        Commands::Album { pin, config } => {
            let config = load_config(config)?;
            let service = build_service(&config)?;
            fetch_album(&service, pin).await
        }
        Commands::Refresh { pin, config } => {
            let config = load_config(config)?;
            let service = build_service(&config)?;

            println!("Refreshing album for pin {pin}...");
            let outcome = service.refresh_album(pin).await?;
            report_outcome(&service, pin, outcome).await;
            prefetch(&service, pin).await
        }
        Commands::Discard { pin, photo, config } => {
            let config = load_config(config)?;
            let service = build_service(&config)?;

            service.discard_photo(pin, photo).await?;
            println!("Discarded photo {photo} from pin {pin}");
            Ok(())
        }
        Commands::Forget { pin, config } => {
            let config = load_config(config)?;
            let service = build_service(&config)?;

            service.forget_pin(pin).await?;
            println!("Forgot pin {pin} and its album");
            Ok(())
        }
        Commands::Status { config } => {
            let config = load_config(config)?;
            show_status(&config)
        }
    }
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'geopin init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}

fn build_service(config: &Config) -> Result<AlbumSyncService> {
    let endpoint = Url::parse(&config.endpoint)
        .with_context(|| format!("Invalid endpoint URL: {}", config.endpoint))?;
    let client = SearchClient::new(
        endpoint,
        config.api_key.clone(),
        config.box_half_width,
        config.box_half_height,
    );

    let store =
        PinStore::load(Path::new(&config.data_file)).context("Failed to load pin index")?;
    let cache = ImageCache::new(&config.cache_dir).context("Failed to open image cache")?;

    Ok(AlbumSyncService::new(client, store, cache))
}

fn drop_pin(config: &Config, latitude: f64, longitude: f64) -> Result<()> {
    let mut store =
        PinStore::load(Path::new(&config.data_file)).context("Failed to load pin index")?;

    let pin = Pin::new(latitude, longitude)?;
    store.commit(vec![StoreOp::PutPin(pin.clone())])?;

    println!("Dropped pin {} at ({latitude}, {longitude})", pin.id);
    Ok(())
}

fn list_pins(config: &Config) -> Result<()> {
    let store =
        PinStore::load(Path::new(&config.data_file)).context("Failed to load pin index")?;

    let pins = store.pins();
    if pins.is_empty() {
        println!("No pins yet. Drop one with 'geopin drop <LAT> <LON>'");
        return Ok(());
    }

    for pin in pins {
        println!(
            "{}  ({}, {})  {} photos",
            pin.id,
            pin.latitude,
            pin.longitude,
            store.album_len(&pin.id)
        );
    }
    Ok(())
}

async fn fetch_album(service: &AlbumSyncService, pin: &str) -> Result<()> {
    println!("Fetching album for pin {pin}...");
    let outcome = service.ensure_album(pin).await?;
    report_outcome(service, pin, outcome).await;
    prefetch(service, pin).await
}

async fn report_outcome(service: &AlbumSyncService, pin: &str, outcome: AlbumOutcome) {
    match outcome {
        AlbumOutcome::AlreadyPopulated => {
            let owned = service.store().lock().await.album_len(pin);
            println!("Pin already owns {owned} photos; nothing fetched");
        }
        AlbumOutcome::Fetched(count) => println!("Fetched {count} photos"),
        AlbumOutcome::Empty => println!("No images found for this location"),
    }
}

async fn prefetch(service: &AlbumSyncService, pin: &str) -> Result<()> {
    let results = service.prefetch_album(pin).await?;
    if results.is_empty() {
        return Ok(());
    }

    let mut cached = 0;
    let mut downloaded = 0;
    let mut failed = 0;

    for result in &results {
        match result {
            PrefetchResult::Cached(_) => cached += 1,
            PrefetchResult::Downloaded(_) => downloaded += 1,
            PrefetchResult::Failed(photo_id, error) => {
                failed += 1;
                println!("  failed to download {photo_id}: {error}");
            }
        }
    }

    println!("Images: {downloaded} downloaded, {cached} already cached, {failed} failed");
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let store =
        PinStore::load(Path::new(&config.data_file)).context("Failed to load pin index")?;
    let cache = ImageCache::new(&config.cache_dir).context("Failed to open image cache")?;

    println!("geopin Status");
    println!("=============");
    println!("Configuration:");
    println!("  Endpoint: {}", config.endpoint);
    println!("  Data file: {}", config.data_file);
    println!("  Cache directory: {}", config.cache_dir);
    println!();
    println!("Pin index loaded with {} pins", store.pin_count());
    println!("  Photo records: {}", store.photo_count());
    println!("  Last updated: {}", store.last_updated());

    let cached = store
        .pins()
        .iter()
        .flat_map(|pin| store.photos_for_pin(&pin.id))
        .filter(|record| cache.contains(&record.id))
        .count();
    println!("  Photos with cached images: {}/{}", cached, store.photo_count());

    Ok(())
}
