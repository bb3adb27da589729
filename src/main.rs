use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgtier::domain::{Consumer, DecodedImage, Level, LoadListener};
use imgtier::domain::entities::DisplayState;
use imgtier::infrastructure::config::paths;
use imgtier::infrastructure::{AppConfig, CliArgs, ImageLoader, LoadRequest};

fn init_logging(config: &AppConfig) -> Result<()> {
    let default_level = LevelFilter::from_level(config.log_level.to_tracing_level());
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), level = %config.log_level, "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let path = paths::config_file(args.config.as_deref());
    let mut config = AppConfig::load(&path)
        .wrap_err_with(|| format!("Failed to load configuration from {}", path.display()))?;
    config.merge_with_args(args);
    Ok(config)
}

/// Prints every tier as it is promoted.
#[derive(Default)]
struct TerminalConsumer {
    state: DisplayState,
}

impl Consumer for TerminalConsumer {
    fn display_state(&self) -> &DisplayState {
        &self.state
    }

    fn apply_result(&self, level: Level, image: &DecodedImage) {
        println!("level {level}: {}x{}", image.width(), image.height());
    }

    fn apply_failure(&self, level: Level) {
        eprintln!("level {level}: failed");
    }
}

#[derive(Default)]
struct Tally {
    loaded: AtomicUsize,
    failed: AtomicUsize,
}

impl LoadListener for Tally {
    fn on_image_loaded(&self, _level: Level) {
        self.loaded.fetch_add(1, Ordering::Relaxed);
    }

    fn on_image_failed(&self, _level: Level) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = imgtier::VERSION, "Starting imgtier");

    let loader =
        ImageLoader::with_defaults(config.loader).wrap_err("Failed to start image loader")?;
    if args.clear_cache {
        loader.clear_all().wrap_err("Failed to clear caches")?;
    }
    if args.resources.is_empty() {
        info!("No resources given");
        loader.shutdown();
        return Ok(());
    }

    let consumer = Arc::new(TerminalConsumer::default());
    let tally = Arc::new(Tally::default());
    let request = args
        .resources
        .iter()
        .fold(LoadRequest::new(), |request, (url, level)| {
            request.with_level(url.as_str(), *level)
        })
        .for_consumer(&consumer)
        .with_listener(tally.clone());

    let report = loader.load(request);
    if let Some((id, level)) = &report.immediate {
        info!(id = %id, level = %level, "Shown from memory");
    }

    if !loader.wait_idle(Duration::from_secs(args.wait)) {
        warn!(pending = loader.pending_count(), "Timed out waiting for loads");
        loader.cancel_all();
    }

    println!(
        "{} loaded, {} failed, best level {}",
        tally.loaded.load(Ordering::Relaxed),
        tally.failed.load(Ordering::Relaxed),
        consumer
            .state
            .current_level()
            .map_or_else(|| "none".to_string(), |level| level.to_string())
    );
    println!("{}", loader.stats());
    loader.shutdown();

    Ok(())
}
