//! Engine configuration loading and config file resolution
//!
//! Configuration is a single TOML document with one table per subsystem.
//! Every key is optional; missing keys fall back to built-in defaults so an
//! empty file (or no file at all) yields a working engine.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `SVD_CONFIG` environment variable
//! 3. `<user config dir>/svd/config.toml`
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SVD_CONFIG";

/// Root configuration for one engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the observer event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Per-voice refill and notification settings
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Hardware batch scheduler and output ring settings
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Byte stream provider settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-voice settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Maximum frames handed to the mixer per refill
    #[serde(default = "default_refill_frames")]
    pub refill_frames: usize,

    /// Frames between two playback-position notifications
    #[serde(default = "default_position_event_interval")]
    pub position_event_interval_frames: u64,
}

/// Hardware decode settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Output slots per decoder instance ring
    #[serde(default = "default_ring_slots")]
    pub ring_slots: usize,

    /// Frames held by one ring slot
    #[serde(default = "default_slot_frames")]
    pub slot_frames: usize,

    /// A batch is only fired when some participating instance has at most
    /// this many readable slots left
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,

    /// Upper bound for one blocking wait on an in-flight batch
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Initial job capacity of the shared batch buffer
    #[serde(default = "default_initial_batch_capacity")]
    pub initial_batch_capacity: usize,

    /// Source frames kept queued inside the resampler while pitch-shifting
    #[serde(default = "default_resampler_padding")]
    pub resampler_padding_frames: usize,

    /// Artificial per-batch latency of the emulated coprocessor
    #[serde(default)]
    pub emulated_latency_ms: u64,
}

/// Byte stream provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Grant size of memory-backed providers
    #[serde(default = "default_memory_block_size")]
    pub memory_block_size: usize,

    /// Bytes read per request by file-backed providers
    #[serde(default = "default_file_read_size")]
    pub file_read_size: usize,

    /// Seek granularity of file-backed providers
    #[serde(default = "default_file_alignment")]
    pub file_alignment: u64,

    /// I/O priority handed to providers (0-100)
    #[serde(default = "default_priority")]
    pub priority: u8,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_event_capacity() -> usize {
    256
}

fn default_refill_frames() -> usize {
    256
}

fn default_position_event_interval() -> u64 {
    1024
}

fn default_ring_slots() -> usize {
    4
}

fn default_slot_frames() -> usize {
    256
}

fn default_low_water_mark() -> usize {
    1
}

fn default_wait_timeout_ms() -> u64 {
    100
}

fn default_initial_batch_capacity() -> usize {
    16
}

fn default_resampler_padding() -> usize {
    64
}

fn default_memory_block_size() -> usize {
    4096
}

fn default_file_read_size() -> usize {
    16 * 1024
}

fn default_file_alignment() -> u64 {
    2048
}

fn default_priority() -> u8 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voice: VoiceConfig::default(),
            hardware: HardwareConfig::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            refill_frames: default_refill_frames(),
            position_event_interval_frames: default_position_event_interval(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            ring_slots: default_ring_slots(),
            slot_frames: default_slot_frames(),
            low_water_mark: default_low_water_mark(),
            wait_timeout_ms: default_wait_timeout_ms(),
            initial_batch_capacity: default_initial_batch_capacity(),
            resampler_padding_frames: default_resampler_padding(),
            emulated_latency_ms: 0,
        }
    }
}

impl HardwareConfig {
    /// Bounded wait used by the scheduler
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            memory_block_size: default_memory_block_size(),
            file_read_size: default_file_read_size(),
            file_alignment: default_file_alignment(),
            priority: default_priority(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading engine config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file and load it, or fall back to defaults
    ///
    /// # Arguments
    /// * `cli_path` - Explicit path from the command line, if any
    ///
    /// # Returns
    /// Loaded configuration. An explicitly named file that does not exist is
    /// an error; a missing default-location file is not.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            ConfigSource::Explicit(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::load(&path)
            }
            ConfigSource::UserDefault(path) if path.exists() => Self::load(&path),
            _ => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.voice.refill_frames == 0 {
            return Err(Error::Config("voice.refill_frames must be > 0".to_string()));
        }
        if self.hardware.ring_slots == 0 {
            return Err(Error::Config("hardware.ring_slots must be > 0".to_string()));
        }
        if self.hardware.slot_frames == 0 {
            return Err(Error::Config("hardware.slot_frames must be > 0".to_string()));
        }
        if self.hardware.low_water_mark >= self.hardware.ring_slots {
            return Err(Error::Config(format!(
                "hardware.low_water_mark ({}) must be below hardware.ring_slots ({})",
                self.hardware.low_water_mark, self.hardware.ring_slots
            )));
        }
        if self.stream.memory_block_size == 0 || self.stream.file_read_size == 0 {
            return Err(Error::Config("stream read sizes must be > 0".to_string()));
        }
        if self.stream.file_alignment == 0 {
            return Err(Error::Config("stream.file_alignment must be > 0".to_string()));
        }
        if self.stream.priority > 100 {
            return Err(Error::Config(format!(
                "stream.priority ({}) must be within 0-100",
                self.stream.priority
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Where a config file path came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named on the command line or in `SVD_CONFIG`
    Explicit(PathBuf),
    /// Platform user config directory
    UserDefault(PathBuf),
    /// No candidate location on this platform
    BuiltIn,
}

/// Resolve the config file location following the documented priority order
pub fn resolve_config_path(cli_path: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    // Priority 3: user config directory
    match dirs::config_dir() {
        Some(dir) => ConfigSource::UserDefault(dir.join("svd").join("config.toml")),
        None => ConfigSource::BuiltIn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.voice.refill_frames, 256);
        assert_eq!(config.hardware.ring_slots, 4);
        assert_eq!(config.hardware.low_water_mark, 1);
    }

    #[test]
    fn test_partial_tables_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [hardware]
            ring_slots = 8
            low_water_mark = 3

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.hardware.ring_slots, 8);
        assert_eq!(config.hardware.low_water_mark, 3);
        assert_eq!(config.hardware.slot_frames, 256);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.stream.file_alignment, 2048);
    }

    #[test]
    fn test_low_water_mark_must_be_below_ring_size() {
        let err = EngineConfig::from_toml_str(
            r#"
            [hardware]
            ring_slots = 2
            low_water_mark = 2
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_stream_priority_is_a_percentage() {
        let config = EngineConfig::from_toml_str("[stream]\npriority = 90").unwrap();
        assert_eq!(config.stream.priority, 90);

        let err = EngineConfig::from_toml_str("[stream]\npriority = 101").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("[voice\nrefill_frames = 1").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_cli_path_has_priority() {
        let source = resolve_config_path(Some(Path::new("/tmp/explicit.toml")));
        assert_eq!(
            source,
            ConfigSource::Explicit(PathBuf::from("/tmp/explicit.toml"))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[voice]\nrefill_frames = 512").unwrap();

        let config = EngineConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.voice.refill_frames, 512);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            EngineConfig::load_or_default(Some(&path)),
            Err(Error::Config(_))
        ));
    }
}
