use std::sync::Arc;
use std::time::Duration;

use metrics::RefreshMetrics;
use state::{PublishError, PublishedSnapshot, SnapshotStore};
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::{AggregateError, SnapshotAggregator};

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Drives the aggregator on a fixed interval and publishes successful
/// cycles. A failed cycle leaves the previous snapshot in place.
pub struct Scheduler {
    aggregator: SnapshotAggregator,
    store: SnapshotStore,
    interval: Duration,
    refresh: Option<RefreshMetrics>,
}

impl Scheduler {
    pub fn new(aggregator: SnapshotAggregator, store: SnapshotStore, interval: Duration) -> Self {
        Self {
            aggregator,
            store,
            interval,
            refresh: None,
        }
    }

    pub fn with_refresh_metrics(mut self, refresh: RefreshMetrics) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// One cycle: collect, then publish. Nothing is published on error.
    pub async fn refresh_once(&self) -> Result<Arc<PublishedSnapshot>, CycleError> {
        let snapshot = self.aggregator.collect().await?;
        Ok(self.store.publish(snapshot)?)
    }

    /// Runs one cycle and records its outcome.
    pub async fn tick(&self) {
        match self.refresh_once().await {
            Ok(published) => {
                if let Some(refresh) = &self.refresh {
                    refresh.record_success();
                }
                let s = published.snapshot();
                info!(
                    miner = %s.miner_id,
                    miner_quality_power = s.miner_quality_power,
                    win_per_day = s.win_per_day,
                    sectors_active = s.sectors_active,
                    sectors_faulty = s.sectors_faulty,
                    available_balance = s.available_balance,
                    "snapshot published"
                );
                tracing::debug!(json = published.json(), "snapshot contents");
            }
            Err(err) => {
                if let Some(refresh) = &self.refresh {
                    refresh.record_failure();
                }
                warn!(error = %err, "refresh cycle failed, keeping previous snapshot");
            }
        }
    }

    /// Ticks forever; the first cycle starts immediately. A slow cycle
    /// pushes later ticks back instead of bursting to catch up.
    pub async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}
