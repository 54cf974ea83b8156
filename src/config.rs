//! Thread pool configuration.

use std::{env, str::FromStr, thread};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How the balancer picks a worker for a new job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Always the worker with the fewest pending jobs.
    #[default]
    LeastLoaded,

    /// Cycle through workers regardless of load. Useful as a baseline.
    RoundRobin,
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "least_loaded" => Ok(Strategy::LeastLoaded),
            "round_robin" => Ok(Strategy::RoundRobin),
            _ => Err(ConfigError::Parse {
                key: "strategy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Thread pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker threads. Fixed for the lifetime of the pool.
    pub workers: usize,
    /// Jobs each worker can hold queued before dispatch blocks.
    pub inbox_capacity: usize,
    /// Jobs that can wait for the balancer before `submit` blocks.
    /// Zero makes every submission a rendezvous with the balancer.
    pub intake_capacity: usize,
    pub strategy: Strategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            inbox_capacity: 2000,
            intake_capacity: 0,
            strategy: Strategy::LeastLoaded,
        }
    }
}

impl Config {
    pub const WORKERS_VAR: &'static str = "LOADWELL_WORKERS";
    pub const INBOX_CAPACITY_VAR: &'static str = "LOADWELL_INBOX_CAPACITY";
    pub const INTAKE_CAPACITY_VAR: &'static str = "LOADWELL_INTAKE_CAPACITY";
    pub const STRATEGY_VAR: &'static str = "LOADWELL_STRATEGY";

    /// Creates a config for the given number of workers, other values default.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Defaults overlaid with any `LOADWELL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(Self::WORKERS_VAR) {
            config.workers = parse_var(Self::WORKERS_VAR, &value)?;
        }
        if let Some(value) = lookup(Self::INBOX_CAPACITY_VAR) {
            config.inbox_capacity = parse_var(Self::INBOX_CAPACITY_VAR, &value)?;
        }
        if let Some(value) = lookup(Self::INTAKE_CAPACITY_VAR) {
            config.intake_capacity = parse_var(Self::INTAKE_CAPACITY_VAR, &value)?;
        }
        if let Some(value) = lookup(Self::STRATEGY_VAR) {
            config.strategy = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers".to_string(),
                message: "a pool needs at least one worker".to_string(),
            });
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "inbox_capacity".to_string(),
                message: "worker inboxes must hold at least one job".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Parse {
        key: key.to_string(),
        value: value.to_string(),
    })
}
