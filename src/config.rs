use crate::defaults;
use crate::error::{ConciergeError, Result};
use crate::persona::{self, AssistantFunction, Industry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub model: ModelConfig,
    pub session: SessionConfig,
}

/// Audio device and format configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_size: usize,
    pub loopback_gain: f32,
}

/// Hosted model connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub model_id: String,
    pub voice: String,
    /// Business the concierge speaks for.
    pub industry: Option<Industry>,
    /// What the concierge handles on the call.
    pub function: Option<AssistantFunction>,
    /// Explicit persona text; overrides `industry` and `function` when set.
    pub system_instruction: Option<String>,
}

impl ModelConfig {
    /// System instruction sent on connect.
    pub fn instruction(&self) -> String {
        match self.system_instruction.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => persona::system_instruction(self.industry, self.function),
        }
    }
}

/// Session limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Hang up after this many seconds; 0 means no limit.
    pub max_duration_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            capture_sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            loopback_gain: defaults::LOOPBACK_GAIN,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: defaults::MODEL_ID.to_string(),
            voice: defaults::VOICE.to_string(),
            industry: None,
            function: None,
            system_instruction: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file yields defaults; invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ConciergeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CONCIERGE_MODEL → model.model_id
    /// - CONCIERGE_VOICE → model.voice
    /// - CONCIERGE_INDUSTRY → model.industry
    /// - CONCIERGE_FUNCTION → model.function
    /// - CONCIERGE_INPUT_DEVICE → audio.input_device
    /// - CONCIERGE_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("CONCIERGE_MODEL")
            && !model.is_empty()
        {
            self.model.model_id = model;
        }

        if let Ok(voice) = std::env::var("CONCIERGE_VOICE")
            && !voice.is_empty()
        {
            self.model.voice = voice;
        }

        if let Ok(industry) = std::env::var("CONCIERGE_INDUSTRY")
            && !industry.is_empty()
        {
            match industry.parse() {
                Ok(industry) => self.model.industry = Some(industry),
                Err(e) => tracing::warn!("Ignoring CONCIERGE_INDUSTRY: {}", e),
            }
        }

        if let Ok(function) = std::env::var("CONCIERGE_FUNCTION")
            && !function.is_empty()
        {
            match function.parse() {
                Ok(function) => self.model.function = Some(function),
                Err(e) => tracing::warn!("Ignoring CONCIERGE_FUNCTION: {}", e),
            }
        }

        if let Ok(device) = std::env::var("CONCIERGE_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("CONCIERGE_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Reject values that would make a session unusable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| ConciergeError::ConfigInvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.audio.capture_sample_rate == 0 {
            return Err(invalid("audio.capture_sample_rate", "must be greater than 0"));
        }
        if self.audio.playback_sample_rate == 0 {
            return Err(invalid("audio.playback_sample_rate", "must be greater than 0"));
        }
        if self.audio.frame_size == 0 {
            return Err(invalid("audio.frame_size", "must be greater than 0"));
        }
        if !self.audio.loopback_gain.is_finite() || self.audio.loopback_gain < 0.0 {
            return Err(invalid("audio.loopback_gain", "must be a finite, non-negative number"));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(invalid("model.model_id", "must not be empty"));
        }
        Ok(())
    }

    /// Serialize to TOML as written by `config init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConciergeError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Write this configuration to `path`, creating parent directories.
    ///
    /// Refuses to overwrite an existing file unless `force` is set.
    pub fn write(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(ConciergeError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/concierge/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("concierge")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_concierge_env() {
        remove_env("CONCIERGE_MODEL");
        remove_env("CONCIERGE_VOICE");
        remove_env("CONCIERGE_INDUSTRY");
        remove_env("CONCIERGE_FUNCTION");
        remove_env("CONCIERGE_INPUT_DEVICE");
        remove_env("CONCIERGE_OUTPUT_DEVICE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.output_device, None);
        assert_eq!(config.audio.capture_sample_rate, 16000);
        assert_eq!(config.audio.playback_sample_rate, 24000);
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.audio.loopback_gain, 1.0);

        assert_eq!(config.model.voice, "Zephyr");
        assert_eq!(config.model.industry, None);
        assert_eq!(config.model.function, None);
        assert_eq!(config.model.instruction(), defaults::SYSTEM_INSTRUCTION);

        assert_eq!(config.session.max_duration_secs, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            input_device = "hw:0,0"
            output_device = "pulse"
            capture_sample_rate = 48000
            frame_size = 2048
            loopback_gain = 0.5

            [model]
            model_id = "test-model"
            voice = "Puck"
            system_instruction = "Be brief."

            [session]
            max_duration_secs = 90
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));
        assert_eq!(config.audio.capture_sample_rate, 48000);
        assert_eq!(config.audio.playback_sample_rate, 24000);
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.audio.loopback_gain, 0.5);

        assert_eq!(config.model.model_id, "test-model");
        assert_eq!(config.model.voice, "Puck");
        assert_eq!(config.model.system_instruction.as_deref(), Some("Be brief."));
        assert_eq!(config.model.instruction(), "Be brief.");

        assert_eq!(config.session.max_duration_secs, 90);
    }

    #[test]
    fn test_persona_from_toml_builds_instruction() {
        let toml_content = r#"
            [model]
            industry = "Home Services"
            function = "Appointments"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.model.industry, Some(Industry::HomeServices));
        assert_eq!(config.model.function, Some(AssistantFunction::Appointments));
        let instruction = config.model.instruction();
        assert!(instruction.contains("Home Services"));
        assert_ne!(instruction, defaults::SYSTEM_INSTRUCTION);
    }

    #[test]
    fn test_unknown_industry_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[model]\nindustry = \"Mining\"\n")
            .unwrap();

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(ConciergeError::Config(_))
        ));
    }

    #[test]
    fn test_explicit_instruction_wins_over_persona() {
        let mut config = Config::default();
        config.model.industry = Some(Industry::Legal);
        config.model.system_instruction = Some("Only speak French.".to_string());
        assert_eq!(config.model.instruction(), "Only speak French.");

        config.model.system_instruction = Some("  ".to_string());
        assert!(config.model.instruction().contains("Legal"));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [model]
            voice = "Kore"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.model.voice, "Kore");
        assert_eq!(config.model.model_id, defaults::MODEL_ID);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_env_override_model_and_voice() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_concierge_env();

        set_env("CONCIERGE_MODEL", "other-model");
        set_env("CONCIERGE_VOICE", "Charon");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.model_id, "other-model");
        assert_eq!(config.model.voice, "Charon");
        assert_eq!(config.audio.input_device, None); // Not overridden

        clear_concierge_env();
    }

    #[test]
    fn test_env_override_persona_ignores_unknown_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_concierge_env();

        set_env("CONCIERGE_INDUSTRY", "real estate");
        set_env("CONCIERGE_FUNCTION", "Astrology");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.industry, Some(Industry::RealEstate));
        assert_eq!(config.model.function, None);

        clear_concierge_env();
    }

    #[test]
    fn test_env_override_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_concierge_env();

        set_env("CONCIERGE_INPUT_DEVICE", "hw:1,0");
        set_env("CONCIERGE_OUTPUT_DEVICE", "pipewire");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pipewire".to_string()));

        clear_concierge_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_concierge_env();

        set_env("CONCIERGE_VOICE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.voice, defaults::VOICE);

        clear_concierge_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [audio
            input_device = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());

        assert!(matches!(result, Err(ConciergeError::Config(_))));
    }

    #[test]
    fn test_default_path_ends_with_app_dir() {
        let path = Config::default_path();
        assert!(path.ends_with("concierge/config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[audio\nframe_size = ").unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rates() {
        let mut config = Config::default();
        config.audio.playback_sample_rate = 0;

        match config.validate() {
            Err(ConciergeError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "audio.playback_sample_rate");
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_gain_and_frame_size() {
        let mut config = Config::default();
        config.audio.loopback_gain = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.session.max_duration_secs = 30;

        config.write(&path, false).unwrap();
        assert!(config.write(&path, false).is_err());
        config.write(&path, true).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
