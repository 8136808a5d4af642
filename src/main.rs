use anyhow::Result;
use clap::{CommandFactory, Parser};
use concierge::app::{RunOptions, run_voice_command};
use concierge::audio::cpal_backend::list_devices;
use concierge::cli::{Cli, Commands, ConfigAction};
use concierge::config::Config;
use concierge::output::render_summary;
use concierge::session::SessionState;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        None | Some(Commands::Run) => {
            let mut config = load_config(cli.config.as_deref())?;

            // Apply CLI overrides
            if let Some(device) = cli.input_device {
                config.audio.input_device = Some(device);
            }
            if let Some(device) = cli.output_device {
                config.audio.output_device = Some(device);
            }
            if let Some(voice) = cli.voice {
                config.model.voice = voice;
            }
            if let Some(industry) = cli.industry {
                config.model.industry = Some(industry);
            }
            if let Some(function) = cli.function {
                config.model.function = Some(function);
            }
            if let Some(gain) = cli.gain {
                config.audio.loopback_gain = gain;
            }

            let options = RunOptions {
                quiet: cli.quiet,
                json: cli.json,
                duration: cli.duration.map(Duration::from_secs),
            };
            let snapshot = run_voice_command(config, options).await?;

            if !cli.quiet && !cli.json {
                eprintln!("{}", render_summary(&snapshot).dimmed());
            }
            if snapshot.state == SessionState::Errored {
                std::process::exit(1);
            }
        }
        Some(Commands::Devices) => {
            list_audio_devices(cli.json)?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "concierge",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Initialize logging on stderr. `RUST_LOG` wins over -q/-v.
fn init_tracing(quiet: bool, verbosity: u8) {
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/concierge/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// List available audio devices.
fn list_audio_devices(json: bool) -> Result<()> {
    let devices = list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.inputs.is_empty() && devices.outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("{}", "Input devices:".bold());
    for (idx, device) in devices.inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("{}", "Output devices:".bold());
    for (idx, device) in devices.outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            Config::default().write(&config_path, force)?;
            println!("{} {}", "Wrote".green(), config_path.display());
        }
    }
    Ok(())
}
