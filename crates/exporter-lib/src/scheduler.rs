//! Dual-interval scrape scheduler
//!
//! Drives the capacity and usage scrapes on two independent intervals from
//! a single task. Scrapes never overlap: a tick's scrape runs to completion
//! (or to its deadline) before the next event is handled. Construction
//! performs one synchronous scrape of each kind and fails if either fails,
//! so the metrics endpoint is never served empty.

use crate::cluster::ClusterClient;
use crate::error::{ConfigError, ScrapeError, StartupError};
use crate::health::HealthRegistry;
use crate::models::ScrapeKind;
use crate::observability::{ExporterMetrics, StructuredLogger};
use crate::scrape::Scraper;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the scrape scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Interval between node capacity scrapes (default: 1 hour)
    pub capacity_interval: Duration,
    /// Interval between usage scrapes (default: 30 seconds)
    pub usage_interval: Duration,
    /// Deadline for a single scrape call (default: 10 seconds)
    pub scrape_timeout: Duration,
    /// Namespaces whose pod usage is not published
    pub excluded_namespaces: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity_interval: Duration::from_secs(60 * 60),
            usage_interval: Duration::from_secs(30),
            scrape_timeout: Duration::from_secs(10),
            excluded_namespaces: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Longest accepted interval or timeout
    pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, duration) in [
            ("capacity interval", self.capacity_interval),
            ("usage interval", self.usage_interval),
            ("scrape timeout", self.scrape_timeout),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
            if duration > Self::MAX_DURATION {
                return Err(ConfigError::DurationTooLong {
                    name,
                    max: Self::MAX_DURATION,
                });
            }
        }
        if self
            .excluded_namespaces
            .iter()
            .any(|namespace| namespace.trim().is_empty())
        {
            return Err(ConfigError::BlankNamespace);
        }
        Ok(())
    }
}

/// Lifecycle of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Running the initial synchronous scrapes
    Initializing,
    /// Scraping on both intervals
    Running,
    /// Shut down; terminal
    Stopped,
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Wait for the scrape loop to exit after shutdown was signalled
    pub async fn stopped(self) -> Result<(), JoinError> {
        self.task.await
    }
}

/// Scrape scheduler driving both scrape cycles
pub struct Scheduler {
    scraper: Scraper,
    config: SchedulerConfig,
    health: HealthRegistry,
    logger: StructuredLogger,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    /// Validate the configuration, run the initial scrapes and spawn the
    /// scrape loop
    ///
    /// The loop exits when `shutdown` receives a value or its sender is
    /// dropped.
    pub async fn start(
        scraper: Scraper,
        config: SchedulerConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SchedulerHandle, StartupError> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(SchedulerState::Initializing);
        let scheduler = Self {
            scraper: scraper.exclude_namespaces(config.excluded_namespaces.iter().cloned()),
            config,
            health,
            logger,
            state: state_tx,
        };

        scheduler
            .scrape(ScrapeKind::Capacity, true)
            .await
            .map_err(StartupError::Capacity)?;
        scheduler
            .scrape(ScrapeKind::Usage, true)
            .await
            .map_err(StartupError::Usage)?;

        scheduler.health.set_ready(true).await;
        scheduler.state.send_replace(SchedulerState::Running);

        let task = tokio::spawn(scheduler.run(shutdown));

        Ok(SchedulerHandle {
            task,
            state: state_rx,
        })
    }

    /// Run the scrape loop until shutdown
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            capacity_interval_secs = self.config.capacity_interval.as_secs(),
            usage_interval_secs = self.config.usage_interval.as_secs(),
            "Starting scrape loop"
        );

        let mut capacity_ticker = ticker(self.config.capacity_interval);
        let mut usage_ticker = ticker(self.config.usage_interval);

        loop {
            let kind = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = capacity_ticker.tick() => ScrapeKind::Capacity,
                _ = usage_ticker.tick() => ScrapeKind::Usage,
            };

            debug!(scraper = %kind, "Scraping");

            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(scraper = %kind, "Abandoning in-flight scrape");
                    break;
                }
                _ = self.scrape(kind, false) => {}
            }
        }

        info!("Scraping stopped");
        self.health.mark_stopped().await;
        self.state.send_replace(SchedulerState::Stopped);
    }

    /// Run one bounded scrape and record its outcome
    async fn scrape(&self, kind: ScrapeKind, startup: bool) -> Result<(), ScrapeError> {
        let timeout = self.config.scrape_timeout;
        let start = Instant::now();

        let result = match kind {
            ScrapeKind::Capacity => self
                .scraper
                .scrape_node_capacity(timeout)
                .await
                .map(|nodes| self.logger.log_capacity_scraped(nodes, start.elapsed())),
            ScrapeKind::Usage => self
                .scraper
                .scrape_usage(timeout)
                .await
                .map(|summary| self.logger.log_usage_scraped(&summary, start.elapsed())),
        };

        let metrics = self.scraper.metrics();
        metrics.observe_scrape_duration(kind, start.elapsed());

        match &result {
            Ok(()) => self.health.record_success(kind).await,
            Err(e) => {
                metrics.inc_scrape_errors(kind);
                self.logger.log_scrape_failed(kind, e, startup);
                self.health.record_failure(kind, e.to_string()).await;
            }
        }

        result
    }
}

/// Interval whose first tick is one period from now, since construction
/// has just scraped
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Builder for creating and starting the scheduler
pub struct SchedulerBuilder {
    client: Arc<dyn ClusterClient>,
    metrics: ExporterMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration
    pub fn new(client: Arc<dyn ClusterClient>, metrics: ExporterMetrics) -> Self {
        Self {
            client,
            metrics,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("metrics-server-exporter"),
            config: SchedulerConfig::default(),
        }
    }

    /// Set the health registry updated after every scrape
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Set the structured logger
    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the node capacity scrape interval
    pub fn capacity_interval(mut self, interval: Duration) -> Self {
        self.config.capacity_interval = interval;
        self
    }

    /// Set the usage scrape interval
    pub fn usage_interval(mut self, interval: Duration) -> Self {
        self.config.usage_interval = interval;
        self
    }

    /// Set the per-call scrape deadline
    pub fn scrape_timeout(mut self, timeout: Duration) -> Self {
        self.config.scrape_timeout = timeout;
        self
    }

    /// Set the namespaces excluded from pod usage
    pub fn excluded_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.config.excluded_namespaces = namespaces;
        self
    }

    /// Run the initial scrapes and start the scrape loop
    pub async fn start(
        self,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SchedulerHandle, StartupError> {
        let scraper = Scraper::new(self.client, self.metrics, self.logger.clone());
        Scheduler::start(scraper, self.config, self.health, self.logger, shutdown).await
    }
}
