//! Explicit per-session context handed to host and replica sessions.

use tandem_config::{Config, EntityConfig, ParticipantConfig};
use tandem_net::ParticipantId;

/// Who this device is and how the session is configured.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The participant operating this device.
    pub local: ParticipantId,
    /// Display name of the local participant.
    pub name: String,
    config: Config,
}

impl SessionContext {
    /// Builds a context; `config` is validated here.
    pub fn new(local: ParticipantId, name: impl Into<String>, config: Config) -> Self {
        Self {
            local,
            name: name.into(),
            config: config.validated(),
        }
    }

    /// Validated configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Defaults for newly spawned entities.
    pub fn entity_defaults(&self) -> &EntityConfig {
        &self.config.entity
    }

    /// Local viewpoint replication settings.
    pub fn participant(&self) -> &ParticipantConfig {
        &self.config.participant
    }

    /// Delay between the forced release and the re-grab of a steal.
    pub fn handoff_delay(&self) -> f64 {
        self.config.session.handoff_delay_secs
    }
}
