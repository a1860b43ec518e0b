//! Builders to construct queues and pipelines from configuration.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::{PipelineConfig, PumpingConfig, QueueConfig, Synchronization};
use crate::core::{
    Persister, ProcessingQueue, Processor, PumpingQueue, QueueError, StagedPipeline, Transferer,
};
use crate::infra::queue::memory::Comparator;

fn comparator<T, F>(compare: F) -> Comparator<T>
where
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    Arc::new(compare)
}

/// Builder for [`ProcessingQueue`].
///
/// ```rust,ignore
/// let queue = ProcessingQueueBuilder::new()
///     .name("notifications")
///     .max_size(10_000)
///     .comparator(|a: &Notification, b: &Notification| b.priority.cmp(&a.priority))
///     .build(PushSender)?;
/// queue.start()?;
/// ```
pub struct ProcessingQueueBuilder<T> {
    config: QueueConfig,
    comparator: Option<Comparator<T>>,
}

impl<T> Default for ProcessingQueueBuilder<T> {
    fn default() -> Self {
        Self {
            config: QueueConfig::default(),
            comparator: None,
        }
    }
}

impl<T> ProcessingQueueBuilder<T> {
    /// Unbounded FIFO queue with default consumer count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Queue name used in logs and thread names.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.with_name(name);
        self
    }

    /// Admission limit.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config = self.config.with_max_size(max_size);
        self
    }

    /// Number of consumer threads.
    #[must_use]
    pub fn consumer_count(mut self, consumer_count: usize) -> Self {
        self.config = self.config.with_consumer_count(consumer_count);
        self
    }

    /// Priority order; smallest first.
    #[must_use]
    pub fn comparator<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.comparator = Some(comparator(compare));
        self
    }

    /// Build the queue around `processor`. Consumers are not started.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConfig`] if the configuration is invalid.
    pub fn build<P>(self, processor: P) -> Result<ProcessingQueue<T, P>, QueueError>
    where
        T: PartialEq + Send + 'static,
        P: Processor<T>,
    {
        ProcessingQueue::with_config(processor, &self.config, self.comparator)
    }
}

/// Builder for [`PumpingQueue`].
pub struct PumpingQueueBuilder<T> {
    config: PumpingConfig,
    comparator: Option<Comparator<T>>,
}

impl<T> Default for PumpingQueueBuilder<T> {
    fn default() -> Self {
        Self {
            config: PumpingConfig::default(),
            comparator: None,
        }
    }
}

impl<T> PumpingQueueBuilder<T> {
    /// Blocking pump with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn config(mut self, config: PumpingConfig) -> Self {
        self.config = config;
        self
    }

    /// Queue name used in logs and thread names.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.queue = self.config.queue.with_name(name);
        self
    }

    /// Admission limit.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.queue = self.config.queue.with_max_size(max_size);
        self
    }

    /// Pump synchronization policy.
    #[must_use]
    pub fn synchronization(mut self, synchronization: Synchronization) -> Self {
        self.config = self.config.with_synchronization(synchronization);
        self
    }

    /// Execution pool size.
    #[must_use]
    pub fn execution_threads(mut self, threads: usize) -> Self {
        self.config = self.config.with_execution_threads(threads);
        self
    }

    /// Priority order; smallest first.
    #[must_use]
    pub fn comparator<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.comparator = Some(comparator(compare));
        self
    }

    /// Build the pump around `processor`. The pump is not started.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidConfig`] if the configuration is invalid
    /// - [`QueueError::Spawn`] if the execution pool cannot start
    pub fn build<P>(self, processor: P) -> Result<PumpingQueue<T, P>, QueueError>
    where
        T: PartialEq + Clone + Send + 'static,
        P: Processor<T>,
    {
        PumpingQueue::with_config(processor, &self.config, self.comparator)
    }
}

/// Builder for [`StagedPipeline`] with per-stage settings and comparators.
pub struct PipelineBuilder<T> {
    config: PipelineConfig,
    persist_comparator: Option<Comparator<T>>,
    transfer_comparator: Option<Comparator<T>>,
}

impl<T> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            persist_comparator: None,
            transfer_comparator: None,
        }
    }
}

impl<T> PipelineBuilder<T> {
    /// Pipeline with default settings for both stages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist stage settings.
    #[must_use]
    pub fn persist(mut self, config: QueueConfig) -> Self {
        self.config.persist = config;
        self
    }

    /// Transfer stage settings.
    #[must_use]
    pub fn transfer(mut self, config: QueueConfig) -> Self {
        self.config.transfer = config;
        self
    }

    /// Priority order of the persist stage.
    #[must_use]
    pub fn persist_comparator<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.persist_comparator = Some(comparator(compare));
        self
    }

    /// Priority order of the transfer stage.
    #[must_use]
    pub fn transfer_comparator<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.transfer_comparator = Some(comparator(compare));
        self
    }

    /// Build the pipeline. Stages are not started.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidConfig`] if either stage is misconfigured
    /// - [`QueueError::Spawn`] if the transfer pool cannot start
    pub fn build<Ps, Tr>(
        self,
        persister: Ps,
        transferer: Tr,
    ) -> Result<StagedPipeline<T, Ps, Tr>, QueueError>
    where
        T: PartialEq + Clone + Send + 'static,
        Ps: Persister<T>,
        Tr: Transferer<T>,
    {
        StagedPipeline::with_config(
            persister,
            transferer,
            &self.config,
            self.persist_comparator,
            self.transfer_comparator,
        )
    }
}
