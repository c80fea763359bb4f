use commonware_utils::quorum;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use veiled_types::threshold::MAX_COMMITTEE;

/// Configuration for a simulator run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Seed for keys, randomness and the scripted sessions.
    pub seed: u64,
    pub committee_size: u32,
    /// Members needed to decrypt. Defaults to the Byzantine quorum.
    #[serde(default)]
    pub threshold: Option<u32>,
    /// Number of scripted participant sessions to run.
    pub participants: usize,
    pub log_level: String,
    pub worker_threads: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: usize },
    #[error("committee_size must be at most {max} (got {value})")]
    CommitteeTooLarge { max: usize, value: u32 },
    #[error("threshold must be between 1 and {members} (got {threshold})")]
    InvalidThreshold { threshold: u32, members: u32 },
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub seed: u64,
    pub committee_size: u32,
    pub threshold: u32,
    pub participants: usize,
    pub log_level: Level,
    pub worker_threads: usize,
}

fn ensure_nonzero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        ensure_nonzero("committee_size", self.committee_size as usize)?;
        ensure_nonzero("worker_threads", self.worker_threads)?;
        if self.committee_size as usize > MAX_COMMITTEE {
            return Err(ConfigError::CommitteeTooLarge {
                max: MAX_COMMITTEE,
                value: self.committee_size,
            });
        }
        let threshold = self
            .threshold
            .unwrap_or_else(|| quorum(self.committee_size));
        if threshold == 0 || threshold > self.committee_size {
            return Err(ConfigError::InvalidThreshold {
                threshold,
                members: self.committee_size,
            });
        }
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            seed: self.seed,
            committee_size: self.committee_size,
            threshold,
            participants: self.participants,
            log_level,
            worker_threads: self.worker_threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = include_str!("../config.yaml");

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("config should parse")
    }

    #[test]
    fn test_example_config_validates() {
        let config = parse(EXAMPLE).validate().unwrap();
        assert_eq!(config.committee_size, 4);
        assert_eq!(config.threshold, quorum(4));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn test_explicit_threshold() {
        let config = parse(
            "seed: 1\ncommittee_size: 5\nthreshold: 2\nparticipants: 1\nlog_level: debug\nworker_threads: 1\n",
        );
        let config = config.validate().unwrap();
        assert_eq!(config.threshold, 2);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let base = parse(EXAMPLE);

        let mut config = base.clone();
        config.threshold = Some(5);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::InvalidThreshold {
                threshold: 5,
                members: 4
            }
        );

        let mut config = base.clone();
        config.committee_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "committee_size",
                ..
            })
        ));

        let mut config = base.clone();
        config.committee_size = MAX_COMMITTEE as u32 + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CommitteeTooLarge { .. })
        ));

        let mut config = base;
        config.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));
    }
}
