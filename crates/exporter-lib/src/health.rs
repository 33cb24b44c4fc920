//! Scraper health and readiness
//!
//! Every scrape records its outcome per [`ScrapeKind`]: when it last
//! succeeded, why it last failed and how many times in a row it has
//! failed. Readiness turns on once the initial synchronous scrapes have
//! completed and off again when scraping stops.

use crate::models::ScrapeKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// State of one scrape cycle, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperStatus {
    /// Last scrape succeeded
    Healthy,
    /// Not scraped yet
    Pending,
    /// Last scrape failed; previously published values are still served
    Degraded,
    /// The scrape loop has exited
    Stopped,
}

/// Outcome history of one scrape cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScraperHealth {
    pub status: ScraperStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    /// Error of the most recent failure, kept after recovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl Default for ScraperHealth {
    fn default() -> Self {
        Self {
            status: ScraperStatus::Pending,
            last_success: None,
            last_failure: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

impl ScraperHealth {
    fn record_success(&mut self, at: DateTime<Utc>) {
        self.status = ScraperStatus::Healthy;
        self.last_success = Some(at);
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self, at: DateTime<Utc>, error: String) {
        self.status = ScraperStatus::Degraded;
        self.last_failure = Some(at);
        self.last_error = Some(error);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

/// Body of the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Worst status among the scrapers
    pub status: ScraperStatus,
    pub scrapers: BTreeMap<ScrapeKind, ScraperHealth>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    scrapers: BTreeMap<ScrapeKind, ScraperHealth>,
    ready: bool,
}

/// Shared record of scraper outcomes; clones observe the same state
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Both scrapers pending, not ready
    pub fn new() -> Self {
        let scrapers = ScrapeKind::ALL
            .into_iter()
            .map(|kind| (kind, ScraperHealth::default()))
            .collect();

        Self {
            state: Arc::new(RwLock::new(HealthState {
                scrapers,
                ready: false,
            })),
        }
    }

    pub async fn record_success(&self, kind: ScrapeKind) {
        let mut state = self.state.write().await;
        state
            .scrapers
            .entry(kind)
            .or_default()
            .record_success(Utc::now());
    }

    pub async fn record_failure(&self, kind: ScrapeKind, error: impl Into<String>) {
        let mut state = self.state.write().await;
        state
            .scrapers
            .entry(kind)
            .or_default()
            .record_failure(Utc::now(), error.into());
    }

    /// Set once the initial scrapes have completed
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Mark every scraper stopped and withdraw readiness
    pub async fn mark_stopped(&self) {
        let mut state = self.state.write().await;
        state.ready = false;
        for health in state.scrapers.values_mut() {
            health.status = ScraperStatus::Stopped;
        }
    }

    pub async fn scraper(&self, kind: ScrapeKind) -> ScraperHealth {
        self.state
            .read()
            .await
            .scrapers
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .scrapers
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ScraperStatus::Pending);

        HealthResponse {
            status,
            scrapers: state.scrapers.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if state.ready {
            None
        } else if state
            .scrapers
            .values()
            .any(|health| health.status == ScraperStatus::Stopped)
        {
            Some("Scraping stopped")
        } else {
            Some("Initial scrape not yet completed")
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
