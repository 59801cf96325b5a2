use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use voxdub_core::clock::SystemClock;
use voxdub_core::config::{Config, LoggingConfig};
use voxdub_core::processor::RemoteProcessor;
use voxdub_core::settings::{SettingsFile, SettingsSource, SettingsWatcher};
use voxdub_core::types::{AudioBatch, AudioChunk, VoiceSelection};
use voxdub_media::file_source::DEFAULT_CHUNK_BYTES;
use voxdub_media::pipeline::PipelineServices;
use voxdub_media::{DubbingPipeline, FileLiveSource, FileSinkBackend, HttpRemoteProcessor, LogNotifier};
use voxdub_processor::build_orchestrator;
use voxdub_processor::store::MemoryObjectStore;

#[derive(Parser)]
#[command(
    name = "voxdub",
    about = "Re-dub the audio of a playing video in another voice and accent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the processing gateway
    Serve {
        /// Port to listen on (default: 8787)
        #[arg(long)]
        port: Option<u16>,

        /// Keep transient objects in memory instead of on disk
        #[arg(long)]
        in_memory: bool,
    },

    /// Dub a recorded audio file as if it were playing live
    Dub {
        /// Audio file to capture from
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for dubbed segments
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Process in-process instead of posting to the gateway
        #[arg(long)]
        local: bool,

        /// Bytes per captured chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_BYTES)]
        chunk_bytes: usize,
    },

    /// Submit one audio file to the gateway and save the result
    Submit {
        file: PathBuf,

        #[arg(long)]
        accent: Option<String>,

        #[arg(long)]
        voice: Option<String>,

        /// Output file (default: dubbed.mp3)
        #[arg(short, long, default_value = "dubbed.mp3")]
        out: PathBuf,
    },

    /// Dubbing settings (enabled, accent, voice)
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show current settings
    Show,
    /// Turn dubbing on
    Enable,
    /// Turn dubbing off
    Disable,
    /// Set the synthesis accent (e.g. en-GB)
    SetAccent { accent: String },
    /// Set the synthesis voice (e.g. Amy)
    SetVoice { voice: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
}

fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) {
    let defaults = LoggingConfig::default();
    let logging = logging.unwrap_or(&defaults);

    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let directives = std::iter::once(level.to_string())
        .chain(logging.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(cli.verbose, config.logging.as_ref());

    match cli.command {
        Commands::Serve { port, in_memory } => {
            let port = port.unwrap_or_else(|| config.server_port());
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid config: {}", errors.join("; "));
            }
            tracing::info!("Starting voxdub gateway on port {port}");
            let state = Arc::new(voxdub_gateway::GatewayState::from_config(config, in_memory));
            voxdub_gateway::start_gateway(state, port).await?;
        }
        Commands::Dub {
            input,
            out_dir,
            local,
            chunk_bytes,
        } => {
            run_dub(&config, &input, &out_dir, local, chunk_bytes).await?;
        }
        Commands::Submit {
            file,
            accent,
            voice,
            out,
        } => {
            let pipeline = config.pipeline();
            let client = HttpRemoteProcessor::new(
                pipeline.endpoint.clone(),
                Duration::from_millis(pipeline.request_timeout_ms),
            )?;
            let data = tokio::fs::read(&file).await?;
            let batch = AudioBatch::from_chunks(0, &[AudioChunk::new(data)]);
            let selection = VoiceSelection::new(
                accent.as_deref().unwrap_or_default(),
                voice.as_deref().unwrap_or_default(),
            );
            tracing::info!(endpoint = %pipeline.endpoint, bytes = batch.len(), "Submitting");
            let audio = client.process(&batch, &selection).await?;
            tokio::fs::write(&out, &audio).await?;
            println!("Wrote {} bytes to {}", audio.len(), out.display());
        }
        Commands::Settings { action } => {
            let file = SettingsFile::new(config.settings_path());
            let settings = match action {
                SettingsAction::Show => file.load().await?,
                SettingsAction::Enable => file.update(|s| s.enabled = true).await?,
                SettingsAction::Disable => file.update(|s| s.enabled = false).await?,
                SettingsAction::SetAccent { accent } => file.update(|s| s.accent = accent).await?,
                SettingsAction::SetVoice { voice } => file.update(|s| s.voice = voice).await?,
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
        },
        Commands::Status => {
            let settings = SettingsFile::new(config.settings_path()).load().await?;
            println!("voxdub v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Settings: {}", config.settings_path().display());
            println!(
                "Dubbing: {} ({} / {})",
                if settings.enabled { "enabled" } else { "disabled" },
                settings.voice,
                settings.accent
            );
            println!("Endpoint: {}", config.pipeline().endpoint);
            println!("Gateway port: {}", config.server_port());
            println!("Storage: {}", config.storage_dir().display());
            let (warnings, errors) = config.validate();
            for w in warnings {
                println!("warning: {w}");
            }
            for e in errors {
                println!("error: {e}");
            }
        }
    }

    Ok(())
}

/// Capture `input` as a live source, dub it, and write segments to `out_dir`.
///
/// Capture follows the settings file: it starts when dubbing is enabled and
/// stops when it is disabled.
async fn run_dub(
    config: &Config,
    input: &Path,
    out_dir: &Path,
    local: bool,
    chunk_bytes: usize,
) -> anyhow::Result<()> {
    let pipeline_cfg = config.pipeline();
    let chunk_interval = Duration::from_millis(pipeline_cfg.chunk_interval_ms);

    let processor: Arc<dyn RemoteProcessor> = if local {
        tracing::info!("Processing in-process");
        Arc::new(build_orchestrator(
            &config.processor(),
            Arc::new(MemoryObjectStore::new()),
        ))
    } else {
        Arc::new(HttpRemoteProcessor::new(
            pipeline_cfg.endpoint.clone(),
            Duration::from_millis(pipeline_cfg.request_timeout_ms),
        )?)
    };

    let live = Arc::new(FileLiveSource::open(input, chunk_bytes, chunk_interval).await?);
    let settings_file = SettingsFile::new(config.settings_path());
    let initial = settings_file.load().await?;
    let (_watcher, mut changes) =
        SettingsWatcher::start(settings_file.path().to_path_buf(), initial.clone())?;

    let mut pipeline = DubbingPipeline::new(
        &pipeline_cfg,
        live.clone(),
        PipelineServices {
            clock: Arc::new(SystemClock),
            settings: Arc::new(settings_file),
            processor,
            backend: Arc::new(FileSinkBackend::new(out_dir)),
            notifier: Arc::new(LogNotifier),
        },
    );

    if initial.enabled {
        pipeline.start()?;
    } else {
        tracing::info!("Dubbing is disabled; run `voxdub settings enable` to start");
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            change = changes.recv() => match change {
                Ok(change) => {
                    if let Some(enabled) = change.enabled_toggled() {
                        pipeline.sync_enabled(enabled).await?;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                if live.is_exhausted() && !pipeline.is_capturing() {
                    break;
                }
            }
        }
    }

    pipeline.stop().await;
    pipeline.drain().await;
    let stats = pipeline.stats().clone();
    pipeline.shutdown().await;

    println!(
        "Processed {} batches ({} dropped, {} failed); segments in {}",
        stats.processed(),
        stats.dropped(),
        stats.failed(),
        out_dir.display()
    );
    Ok(())
}
