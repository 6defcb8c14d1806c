//! Application entry point: `media-studio` command line.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run) and create
//!    its directories.
//! 3. Create the [`tokio`] runtime.
//! 4. Dispatch the subcommand.  `transcribe` drives a
//!    [`Coordinator<Transcribe>`] through load, execute and unload; Ctrl-C
//!    cancels whichever scope is active.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use media_studio::{
    audio::read_wav,
    catalog::{FeatureKind, ModelCatalog, ModelDescriptor},
    config::AppConfig,
    coordinator::{Coordinator, PipelineSelection},
    device::{Device, DeviceKind, DeviceResolver},
    features::{Transcribe, TranscribeRequest, TranscribeTask},
    history::{History, HistoryDetails, HistoryStore},
    pipeline::factory::accepts,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "media-studio", version, about = "Local image, speech and transcription pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalog models per feature.
    Models {
        /// Only show models that run on `cpu` or `gpu`.
        #[arg(long)]
        device: Option<String>,
    },
    /// List devices available for inference.
    Devices,
    /// List saved history entries, newest first.
    History,
    /// Transcribe a WAV file with a Whisper model.
    Transcribe {
        /// Input WAV file.
        input: PathBuf,
        /// Model id or name (default: the catalog default).
        #[arg(long)]
        model: Option<String>,
        /// `cpu`, `gpu` or `gpu:<id>`.
        #[arg(long)]
        device: Option<String>,
        /// ISO-639-1 code or `auto`.
        #[arg(long)]
        language: Option<String>,
        /// Translate to English instead of transcribing.
        #[arg(long)]
        translate: bool,
        /// Beam width; `1` selects greedy decoding.
        #[arg(long)]
        beams: Option<u32>,
    },
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn list_models(catalog: &ModelCatalog, device: Option<DeviceKind>) {
    for feature in FeatureKind::ALL {
        println!("{feature}:");
        let default_id = catalog.default_for(feature).map(|m| m.id.clone());
        let models = match device {
            Some(kind) => catalog.for_device(feature, kind),
            None => catalog.for_feature(feature),
        };
        for model in models {
            let marker = if default_id.as_deref() == Some(model.id.as_str()) { '*' } else { ' ' };
            let status = if model.is_valid() { "ready" } else { "missing" };
            println!("  {marker} {:<20} {:<28} {:<24} {status}", model.id, model.name, model.family);
            if !model.voices.is_empty() {
                println!("      voices: {}", model.voices.join(", "));
            }
        }
    }
}

fn parse_device_kind(arg: &str) -> Result<DeviceKind> {
    match arg.to_ascii_lowercase().as_str() {
        "cpu" => Ok(DeviceKind::Cpu),
        "gpu" => Ok(DeviceKind::Gpu),
        other => bail!("unknown device kind '{other}'"),
    }
}

fn list_devices(devices: &DeviceResolver) {
    let default = devices.default_device();
    for device in devices.devices() {
        let marker = if device == default { '*' } else { ' ' };
        println!("  {marker} {device}");
    }
}

async fn list_history(history: &HistoryStore) -> Result<()> {
    history.initialize().await?;
    for item in history.items() {
        println!(
            "{}  {:<10} {:<16} {}",
            item.timestamp.format("%Y-%m-%d %H:%M:%S"),
            item.details.prefix(),
            item.model,
            item.media_path.display()
        );
    }
    Ok(())
}

fn parse_device(devices: &DeviceResolver, arg: &str) -> Result<Device> {
    let (kind, id) = match arg.split_once(':') {
        Some((kind, id)) => (kind, id.parse::<u32>().context("invalid device id")?),
        None => (arg, 0),
    };
    let kind = parse_device_kind(kind)?;
    devices
        .find(kind, id)
        .cloned()
        .with_context(|| format!("device {arg} is not available"))
}

fn pick_model<'a>(catalog: &'a ModelCatalog, arg: Option<&str>) -> Result<&'a ModelDescriptor> {
    let model = match arg {
        Some(key) => catalog
            .find(key)
            .or_else(|| catalog.find_by_name(key))
            .with_context(|| format!("unknown model '{key}'"))?,
        None => catalog
            .default_for(FeatureKind::Transcribe)
            .context("no transcription model is installed")?,
    };
    if !accepts::<Transcribe>(model) {
        bail!("model '{}' is a {} model", model.id, model.feature());
    }
    Ok(model)
}

struct TranscribeArgs {
    input: PathBuf,
    model: Option<String>,
    device: Option<String>,
    language: Option<String>,
    translate: bool,
    beams: Option<u32>,
}

async fn transcribe(
    mut config: AppConfig,
    mut catalog: ModelCatalog,
    devices: Arc<DeviceResolver>,
    history: &HistoryStore,
    args: TranscribeArgs,
) -> Result<()> {
    let model = pick_model(&catalog, args.model.as_deref())?.clone();
    let device = match args.device.as_deref() {
        Some(arg) => parse_device(&devices, arg)?,
        None => devices.default_device().clone(),
    };

    let coordinator = Arc::new(Coordinator::<Transcribe>::new(
        Transcribe::factory(),
        Arc::clone(&devices),
    ));

    // Ctrl-C cancels the active scope.
    {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !coordinator.flags().is_busy() {
                    log::info!("main: nothing to cancel");
                } else if coordinator.cancel() {
                    log::warn!("main: cancellation requested");
                }
            }
        });
    }

    // Progress reporting
    {
        let mut progress = coordinator.subscribe_progress();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let update = progress.borrow_and_update().clone();
                if update.total > 0 {
                    log::info!("progress: {}/{}", update.step, update.total);
                }
            }
        });
    }

    let selection = PipelineSelection::new(device, model.clone());
    if selection.requires_reload(coordinator.selection().as_ref()) {
        log::info!("main: loading {} on {}", model.id, selection.device);
        coordinator.load(selection).await?;
    }

    let audio = read_wav(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let mut request = TranscribeRequest::new(audio);
    request.language = args.language.unwrap_or_else(|| config.transcribe.language.clone());
    request.beams = args.beams.unwrap_or(config.transcribe.beams);
    if args.translate {
        request.task = TranscribeTask::Translate;
    }

    let result = match coordinator.execute(request.clone()).await {
        Ok(result) => result,
        Err(e) => {
            if let Err(unload) = coordinator.unload().await {
                log::warn!("main: unload failed: {unload}");
            }
            return Err(e.into());
        }
    };
    println!("{}", result.text);
    log::info!("main: transcribed in {} ms", result.duration_ms);

    let details = HistoryDetails::from_transcription(&request, &result);
    match history.add_text(&model.id, &result.text, details).await {
        Ok(item) => log::info!("main: saved {}", item.media_path.display()),
        Err(e) => log::warn!("main: failed to save history: {e}"),
    }

    catalog.set_default(&model.id);
    config.update_models(&catalog);
    if let Err(e) = config.save() {
        log::warn!("main: failed to save config: {e}");
    }

    coordinator.unload().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if let Err(e) = config.initialize() {
        log::warn!("Failed to create data directories: {e}");
    }

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let catalog = config.catalog();
    let devices = Arc::new(DeviceResolver::from_config(&config.devices));
    let history = HistoryStore::new(&config.directories.history, config.history.max_items);

    // 4. Dispatch
    rt.block_on(async move {
        match cli.command {
            Command::Models { device } => {
                let kind = device.as_deref().map(parse_device_kind).transpose()?;
                list_models(&catalog, kind);
                Ok(())
            }
            Command::Devices => {
                list_devices(&devices);
                Ok(())
            }
            Command::History => list_history(&history).await,
            Command::Transcribe {
                input,
                model,
                device,
                language,
                translate,
                beams,
            } => {
                let args = TranscribeArgs {
                    input,
                    model,
                    device,
                    language,
                    translate,
                    beams,
                };
                transcribe(config, catalog, devices, &history, args).await
            }
        }
    })
}
