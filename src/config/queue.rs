//! Queue, pump and pipeline configuration structures.

use std::env;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Settings for one priority work queue and its consumer pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name used in logs and thread names. A random short name when unset.
    pub name: Option<String>,
    /// Admission limit. Unbounded when unset.
    pub max_size: Option<usize>,
    /// Consumer threads. Defaults to the processor's batch size.
    pub consumer_count: Option<usize>,
}

impl QueueConfig {
    /// Unbounded, unnamed queue with default consumer count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the admission limit.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Set the number of consumer threads.
    #[must_use]
    pub const fn with_consumer_count(mut self, consumer_count: usize) -> Self {
        self.consumer_count = Some(consumer_count);
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == Some(0) {
            return Err("max_size must be greater than 0".into());
        }
        if self.consumer_count == Some(0) {
            return Err("consumer_count must be greater than 0".into());
        }
        if self.name.as_deref().is_some_and(str::is_empty) {
            return Err("name must not be empty".into());
        }
        Ok(())
    }

    /// Parse and validate from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `WORK_QUEUE_NAME`, `WORK_QUEUE_MAX_SIZE` and `WORK_QUEUE_CONSUMERS`.
    ///
    /// # Errors
    ///
    /// Fails if a variable is present but not a valid value.
    pub fn from_env() -> AppResult<Self> {
        Self::from_env_prefixed("WORK_QUEUE")
    }

    /// Read `<PREFIX>_NAME`, `<PREFIX>_MAX_SIZE` and `<PREFIX>_CONSUMERS`,
    /// after loading a `.env` file if one exists.
    ///
    /// # Errors
    ///
    /// Fails if a variable is present but not a valid value.
    pub fn from_env_prefixed(prefix: &str) -> AppResult<Self> {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();

        let cfg = Self {
            name: env::var(format!("{prefix}_NAME")).ok(),
            max_size: parse_env(&format!("{prefix}_MAX_SIZE"))?,
            consumer_count: parse_env(&format!("{prefix}_CONSUMERS"))?,
        };
        cfg.validate()
            .map_err(|e| anyhow::anyhow!("{prefix} configuration invalid: {e}"))?;
        Ok(cfg)
    }
}

/// How the pump waits for a submitted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Synchronization {
    /// Wait for each batch (bounded by the processing timeout) before the next.
    #[default]
    Blocking,
    /// Submit batches back to back without waiting.
    NonBlocking,
}

/// Settings for a [`PumpingQueue`](crate::core::PumpingQueue).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpingConfig {
    /// Queue settings. `consumer_count` is ignored: there is one pump.
    pub queue: QueueConfig,
    /// Pump synchronization policy.
    pub synchronization: Synchronization,
    /// Threads in the execution pool. Defaults to twice the CPU count.
    pub execution_threads: Option<usize>,
}

impl PumpingConfig {
    /// Blocking pump with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue settings.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the synchronization policy.
    #[must_use]
    pub const fn with_synchronization(mut self, synchronization: Synchronization) -> Self {
        self.synchronization = synchronization;
        self
    }

    /// Set the execution pool size.
    #[must_use]
    pub const fn with_execution_threads(mut self, threads: usize) -> Self {
        self.execution_threads = Some(threads);
        self
    }

    /// Execution pool size after defaults.
    #[must_use]
    pub fn effective_execution_threads(&self) -> usize {
        self.execution_threads
            .unwrap_or_else(|| num_cpus::get().max(1) * 2)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        self.queue.validate()?;
        if self.execution_threads == Some(0) {
            return Err("execution_threads must be greater than 0".into());
        }
        Ok(())
    }
}

/// Settings for a [`StagedPipeline`](crate::core::StagedPipeline).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Persist stage queue.
    pub persist: QueueConfig,
    /// Transfer stage queue.
    pub transfer: QueueConfig,
}

impl PipelineConfig {
    /// Default settings for both stages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate both stages.
    ///
    /// # Errors
    ///
    /// Returns a message naming the invalid stage.
    pub fn validate(&self) -> Result<(), String> {
        self.persist
            .validate()
            .map_err(|e| format!("persist stage invalid: {e}"))?;
        self.transfer
            .validate()
            .map_err(|e| format!("transfer stage invalid: {e}"))?;
        Ok(())
    }

    /// Parse and validate from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read both stages from the environment (`PERSIST_QUEUE_*`, `TRANSFER_QUEUE_*`).
    ///
    /// # Errors
    ///
    /// Fails if a variable is present but not a valid value.
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            persist: QueueConfig::from_env_prefixed("PERSIST_QUEUE")?,
            transfer: QueueConfig::from_env_prefixed("TRANSFER_QUEUE")?,
        })
    }
}

fn parse_env(key: &str) -> AppResult<Option<usize>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("{key} must be a non-negative integer, got `{raw}`")),
        Err(_) => Ok(None),
    }
}
