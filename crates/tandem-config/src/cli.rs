//! Command-line arguments shared by Tandem binaries.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tandem command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tandem", about = "Shared-space object manipulation session")]
pub struct CliArgs {
    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Simulated session length in seconds.
    #[arg(long, default_value_t = 10.0)]
    pub seconds: f64,

    /// Probability of dropping an unreliable frame.
    #[arg(long)]
    pub drop_rate: Option<f64>,

    /// Force exclusive (true) or stealable (false) entities.
    #[arg(long)]
    pub exclusive: Option<bool>,

    /// Entity sampling rate in Hz.
    #[arg(long)]
    pub update_rate: Option<u32>,

    /// Participant pose rate in Hz.
    #[arg(long)]
    pub participant_rate: Option<u32>,
}

impl Config {
    /// Apply CLI overrides to a loaded config, then re-validate.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(rate) = args.drop_rate {
            self.network.drop_rate = rate;
        }
        if let Some(exclusive) = args.exclusive {
            self.entity.exclusive_mode = exclusive;
        }
        if let Some(rate) = args.update_rate {
            self.entity.update_rate = rate;
        }
        if let Some(rate) = args.participant_rate {
            self.participant.update_rate = rate;
        }
        *self = std::mem::take(self).validated();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            exclusive: Some(false),
            update_rate: Some(50),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert!(!config.entity.exclusive_mode);
        assert_eq!(config.entity.update_rate, 20);
        assert_eq!(config.debug.log_level, "debug");
        // Non-overridden fields retain defaults
        assert_eq!(config.participant.update_rate, 20);
        assert_eq!(config.network.drop_rate, 0.0);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "tandem",
            "--seconds",
            "3.5",
            "--drop-rate",
            "0.25",
            "--exclusive",
            "false",
        ]);
        assert_eq!(args.seconds, 3.5);
        assert_eq!(args.drop_rate, Some(0.25));
        assert_eq!(args.exclusive, Some(false));
        assert!(args.config.is_none());
    }
}
