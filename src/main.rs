use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use walktrack::config::Config;
use walktrack::controller::{Collaborators, TrackingController};
use walktrack::geocode::create_geocoding_service;
use walktrack::location::Coordinate;
use walktrack::observer::{ChannelObserver, TrackingEvent};
use walktrack::places::PlacesProvider;
use walktrack::settings::{ResolutionHandle, SettingsOutcome};
use walktrack::sim::{
    FixedPermissionGate, MockPlacesProvider, ScriptedSettingsChecker, SimulatedLocationSource,
};
use walktrack::state::SavedState;
use walktrack::worker::{GeocodeRequest, GeocodeResult, GeocodeWorker};

#[derive(Parser)]
#[command(author, version, about = "Track your location and see where you are")]
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

    /// Track a simulated walk and print each address
    Track {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Stop after this many resolved addresses
        #[arg(short = 'n', long, default_value_t = 3)]
        fixes: usize,

        /// Refuse the location permission prompt
        #[arg(long)]
        deny_permission: bool,

        /// How the device settings respond to the tracking policy
        #[arg(long, value_enum, default_value_t = SettingsMode::Satisfied)]
        settings: SettingsMode,
    },

    /// Show the last saved address
    Status {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Reverse geocode a single coordinate
    Geocode {
        /// Latitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SettingsMode {
    Satisfied,
    Resolvable,
    Unresolvable,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force, config } => init_config(config, *force),
        Commands::Track {
            config,
            fixes,
            deny_permission,
            settings,
        } => {
            let config_data = load_config(config)?;
            track(&config_data, *fixes, *deny_permission, *settings).await
        }
        Commands::Status { config } => {
            let config_data = load_config(config)?;
            let state_path = PathBuf::from(&config_data.state_file);
            let saved = SavedState::load(&state_path).context("Failed to load saved state")?;

            println!("walktrack Status");
            println!("State file: {}", state_path.display());
            println!("Tracking: {}", if saved.tracking { "on" } else { "off" });
            println!("{}", saved.screen_text());
            Ok(())
        }
        Commands::Geocode { lat, lon, config } => {
            let config_data = load_config(config)?;
            let worker = GeocodeWorker::new(create_geocoding_service(&config_data.geocoder));
            let request = GeocodeRequest::new(Coordinate::new(*lat, *lon, Utc::now()));

            match worker.resolve(request).await.result {
                GeocodeResult::Success(lines) => {
                    for line in lines {
                        println!("{line}");
                    }
                    Ok(())
                }
                GeocodeResult::Failure(kind, message) => {
                    anyhow::bail!("{kind}: {message}")
                }
            }
        }
    }
}

async fn track(
    config: &Config,
    fixes: usize,
    deny_permission: bool,
    settings_mode: SettingsMode,
) -> Result<()> {
    let policy = config.policy.to_policy()?;
    let state_path = PathBuf::from(&config.state_file);
    let saved = SavedState::load(&state_path).context("Failed to load saved state")?;

    if let Some(text) = saved.display_text() {
        println!("Restored:\n{text}");
    }

    let permissions = if deny_permission {
        FixedPermissionGate::answering(false)
    } else {
        FixedPermissionGate::granted()
    };

    let settings = match settings_mode {
        SettingsMode::Satisfied => ScriptedSettingsChecker::always(SettingsOutcome::Satisfied),
        SettingsMode::Resolvable => ScriptedSettingsChecker::new([
            SettingsOutcome::ResolvableViaUserDialog(ResolutionHandle::new(
                1,
                "Turn on high accuracy location mode",
            )),
            SettingsOutcome::Satisfied,
        ]),
        SettingsMode::Unresolvable => ScriptedSettingsChecker::always(SettingsOutcome::Unresolvable),
    };

    let places: Option<Arc<dyn PlacesProvider>> = if config.places_enabled {
        Some(Arc::new(MockPlacesProvider))
    } else {
        None
    };

    let collaborators = Collaborators {
        location: Arc::new(SimulatedLocationSource::new(
            config.simulation.start_latitude,
            config.simulation.start_longitude,
            config.simulation.step_degrees,
        )),
        settings: Arc::new(settings),
        geocoder: create_geocoding_service(&config.geocoder),
        permissions: Arc::new(permissions),
        places,
    };

    let (observer, mut events) = ChannelObserver::new();
    let resuming = saved.tracking;
    let (handle, task) =
        TrackingController::spawn_restored(collaborators, policy, Arc::new(observer), saved);

    if !resuming {
        handle.start_tracking()?;
    }

    println!("Tracking location (Ctrl-C to stop)...");
    let mut resolved = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    TrackingEvent::Loading => {}
                    TrackingEvent::AddressResolved { lines, timestamp } => {
                        resolved += 1;
                        println!("[{}] {}", timestamp.format("%I:%M:%S %p"), lines.join(", "));
                        if resolved >= fixes {
                            break;
                        }
                    }
                    TrackingEvent::Error { kind, message } => {
                        println!("Error: {message}");
                        if kind.aborts_attempt() {
                            break;
                        }
                    }
                    TrackingEvent::PermissionNeeded => {
                        println!("Requesting location permission...");
                    }
                    TrackingEvent::SettingsResolutionNeeded(resolution) => {
                        println!("Settings change needed: {}. Accepting.", resolution.description);
                        handle.on_settings_resolved(true)?;
                    }
                    TrackingEvent::PlaceHint(guess) => {
                        println!(
                            "  near {} ({})",
                            guess.name.as_deref().unwrap_or("an unknown place"),
                            guess.hint
                        );
                    }
                }
            }
            _ = &mut ctrl_c => {
                println!("Interrupted");
                break;
            }
        }
    }

    let saved = handle.shutdown().await?;
    drop(handle);
    task.await.context("Tracking controller task failed")?;

    saved
        .save(&state_path)
        .with_context(|| format!("Failed to save state to {}", state_path.display()))?;

    println!("Resolved {resolved} address(es)");
    println!("Saved state to {}", state_path.display());
    Ok(())
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
            "Config file not found at {}. Run 'walktrack init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}
