//! Voice session application entry point.
//!
//! Wires the cpal devices, the loopback transport and the session driver
//! together and runs them until Ctrl+C, the time limit or the session ending.

use crate::audio::cpal_backend::{CpalBackend, suppress_audio_warnings};
use crate::config::Config;
use crate::error::{ConciergeError, Result};
use crate::output::{render_json, render_snapshot};
use crate::session::{SessionControl, SessionDriver, SessionSettings, SessionSnapshot, VoiceSession};
use crate::transport::LoopbackTransport;
use std::io::IsTerminal;
use std::time::Duration;

/// Presentation and limit options for a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub quiet: bool,
    pub json: bool,
    /// Overrides `session.max_duration_secs` when set.
    pub duration: Option<Duration>,
}

/// Effective time limit: CLI first, then config; zero means none.
pub fn session_time_limit(config: &Config, cli: Option<Duration>) -> Option<Duration> {
    cli.or(Some(Duration::from_secs(config.session.max_duration_secs)))
        .filter(|limit| !limit.is_zero())
}

/// Run one voice session and return its final snapshot.
pub async fn run_voice_command(config: Config, options: RunOptions) -> Result<SessionSnapshot> {
    config.validate()?;
    tracing::info!(
        version = %crate::version_string(),
        voice = %config.model.voice,
        industry = ?config.model.industry,
        function = ?config.model.function,
        "concierge starting"
    );

    // Suppress noisy JACK/ALSA warnings before audio init
    suppress_audio_warnings();

    let limit = session_time_limit(&config, options.duration);
    let (tx, rx) = crossbeam_channel::unbounded();
    let control = SessionControl::new(tx.clone());

    let color = std::io::stderr().is_terminal();
    let RunOptions { quiet, json, .. } = options;
    let observer = move |snapshot: &SessionSnapshot| {
        if json {
            match render_json(snapshot) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to encode snapshot: {}", e),
            }
        } else if !quiet {
            eprintln!("{}", render_snapshot(snapshot, color));
        }
    };

    if !quiet && !json {
        match limit {
            Some(limit) => eprintln!(
                "Talking for up to {}. Press Ctrl+C to hang up.",
                humantime::format_duration(limit)
            ),
            None => eprintln!("Talking. Press Ctrl+C to hang up."),
        }
    }

    // cpal streams are not Send, so the backend lives on the driver thread.
    let mut worker = tokio::task::spawn_blocking(move || {
        let settings = SessionSettings::from_config(&config);
        let backend = CpalBackend::new(
            config.audio.input_device.clone(),
            config.audio.output_device.clone(),
        );
        let transport = LoopbackTransport::new(config.audio.playback_sample_rate)
            .with_gain(config.audio.loopback_gain);
        let session = VoiceSession::new(settings, Box::new(backend), Box::new(transport), tx);

        let mut driver = SessionDriver::new(session, rx)
            .exit_when_finished()
            .with_observer(observer);
        if let Some(limit) = limit {
            driver = driver.with_time_limit(limit);
        }
        driver.run()
    });

    control.start();

    let finished = tokio::select! {
        finished = &mut worker => finished,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("Failed to wait for Ctrl+C: {}", e);
            }
            if !quiet && !json {
                eprintln!("\nHanging up...");
            }
            control.shutdown();
            worker.await
        }
    };

    finished.map_err(|e| ConciergeError::Other(format!("Session thread failed: {}", e)))
}
