//! Top-level session configuration and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::entity::EntityConfig;
use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Everything a host or replica needs to start a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Session-wide timing.
    pub session: SessionConfig,
    /// Defaults for newly spawned entities.
    pub entity: EntityConfig,
    /// Participant pose replication.
    pub participant: ParticipantConfig,
    /// Simulated link behavior.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Session-wide timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay between the forced release and the re-grab of a steal.
    pub handoff_delay_secs: f64,
    /// Render/update frames per second driven by the demo loop.
    pub frame_rate: u32,
}

/// Participant (camera pose) replication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParticipantConfig {
    /// Pose sampling rate in Hz (0–20, 0 disables replication).
    pub update_rate: u32,
    /// Minimum displacement in meters worth a send.
    pub position_threshold: f32,
    /// Minimum rotation in degrees worth a send.
    pub rotation_threshold: f32,
    /// Highest rate that still uses the reliable channel.
    pub reliable_rate_limit: u32,
    /// Physical size of the shared space; normalizes avatar smoothing.
    pub session_scale: f32,
}

/// Simulated link behavior for the loopback transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Probability that an unreliable frame is dropped.
    pub drop_rate: f64,
    /// Probability that an unreliable frame is held back behind the next one.
    pub reorder_rate: f64,
    /// Seed for the drop/reorder generator.
    pub seed: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Print link counters when the demo exits.
    pub print_bandwidth: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handoff_delay_secs: 0.1,
            frame_rate: 60,
        }
    }
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            update_rate: 20,
            position_threshold: 0.1,
            rotation_threshold: 10.0,
            reliable_rate_limit: 5,
            session_scale: 1.0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.0,
            reorder_rate: 0.0,
            seed: 7,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            print_bandwidth: true,
        }
    }
}

// --- Validation ---

impl ParticipantConfig {
    /// Clamps every field into its legal range.
    pub fn validated(mut self) -> Self {
        self.update_rate = self.update_rate.min(20);
        self.position_threshold = self.position_threshold.max(0.0);
        self.rotation_threshold = self.rotation_threshold.max(0.0);
        if self.session_scale.is_nan() || self.session_scale <= 0.0 {
            self.session_scale = 1.0;
        }
        self
    }

    /// Seconds between samples, or `None` when replication is disabled.
    pub fn sample_period(&self) -> Option<f64> {
        (self.update_rate > 0).then(|| 1.0 / f64::from(self.update_rate.min(20)))
    }

    /// Low rates go over the reliable channel, high rates over the
    /// unreliable one.
    pub fn uses_reliable_channel(&self) -> bool {
        self.update_rate <= self.reliable_rate_limit
    }
}

impl Config {
    /// Returns a copy with every section clamped into range.
    pub fn validated(mut self) -> Self {
        self.entity = self.entity.validated();
        self.participant = self.participant.validated();
        self.session.handoff_delay_secs = self.session.handoff_delay_secs.max(0.0);
        self.session.frame_rate = self.session.frame_rate.max(1);
        self.network.drop_rate = probability(self.network.drop_rate);
        self.network.reorder_rate = probability(self.network.reorder_rate);
        self
    }
}

/// Clamp to `[0, 1]`; NaN means "never".
fn probability(rate: f64) -> f64 {
    if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) }
}

// --- Load / Save / Reload ---

/// Platform configuration directory for Tandem (`<config_dir>/tandem`).
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("tandem"))
        .ok_or(ConfigError::NoConfigDir)
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(false)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PositionMode, RotationMode};

    #[test]
    fn test_default_config_serializes() {
        let ron_str =
            ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::new())
                .unwrap();
        assert!(ron_str.contains("update_rate: 5"));
        assert!(ron_str.contains("handoff_delay_secs: 0.1"));
        assert!(ron_str.contains("CenterToView"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(session: (), debug: ())").unwrap();
        assert_eq!(config.entity, EntityConfig::default());
        assert_eq!(config.participant, ParticipantConfig::default());
    }

    #[test]
    fn test_partial_entity_section() {
        let config: Config =
            ron::from_str("(entity: (rotation_mode: ForkliftMode, snap_to_grid: true))").unwrap();
        assert_eq!(config.entity.rotation_mode, RotationMode::ForkliftMode);
        assert_eq!(config.entity.position_mode, PositionMode::CenterToView);
        assert!(config.entity.snap_to_grid);
        assert_eq!(config.entity.update_rate, 5);
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.entity.exclusive_mode = false;
        config.entity.destroy_below = Some(-1.5);
        config.participant.update_rate = 4;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.session.handoff_delay_secs = 0.25;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.session.handoff_delay_secs, 0.25);
    }

    #[test]
    fn test_read_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::default().reload(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
        assert!(err.to_string().contains("config.ron"));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_participant_channel_choice() {
        let mut participant = ParticipantConfig::default();
        assert!(!participant.uses_reliable_channel());
        participant.update_rate = 5;
        assert!(participant.uses_reliable_channel());
        participant.update_rate = 0;
        assert_eq!(participant.sample_period(), None);
    }

    #[test]
    fn test_config_validated_clamps_all_sections() {
        let mut config = Config::default();
        config.participant.update_rate = 60;
        config.entity.update_rate = 0;
        config.network.drop_rate = 2.0;
        let config = config.validated();
        assert_eq!(config.participant.update_rate, 20);
        assert_eq!(config.entity.update_rate, 1);
        assert_eq!(config.network.drop_rate, 1.0);
    }

    #[test]
    fn test_nan_link_rates_become_zero() {
        let mut config = Config::default();
        config.network.drop_rate = f64::NAN;
        config.network.reorder_rate = f64::NAN;
        let config = config.validated();
        assert_eq!(config.network.drop_rate, 0.0);
        assert_eq!(config.network.reorder_rate, 0.0);
    }
}
