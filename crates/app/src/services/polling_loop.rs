//! Polling loop: refresh every registered device on a fixed period.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::state_refresher::{RefreshOutcome, StateRefresher};
use crate::ports::{DeviceProtocol, MessagePublisher};

/// Summary of one polling tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub published: usize,
    pub failed: usize,
    pub evicted: usize,
}

pub struct PollingLoop<P, B> {
    refresher: Arc<StateRefresher<P, B>>,
}

impl<P, B> PollingLoop<P, B>
where
    P: DeviceProtocol,
    B: MessagePublisher,
{
    pub fn new(refresher: Arc<StateRefresher<P, B>>) -> Self {
        Self { refresher }
    }

    /// Refresh every device of a registry snapshot concurrently.
    ///
    /// Devices are independent: one slow or failing device never delays the
    /// publication of another beyond the request timeout.
    pub async fn tick(&self) -> PollReport {
        let devices = self.refresher.registry().all();
        let outcomes = join_all(
            devices
                .iter()
                .map(|device| self.refresher.refresh(&device.identity)),
        )
        .await;

        let report = outcomes
            .iter()
            .fold(PollReport::default(), |mut report, outcome| {
                match outcome {
                    RefreshOutcome::Published(_) => report.published += 1,
                    RefreshOutcome::Failed { .. } => report.failed += 1,
                    RefreshOutcome::Evicted => {
                        report.failed += 1;
                        report.evicted += 1;
                    }
                    RefreshOutcome::Unknown => {}
                }
                report
            });
        tracing::info!(
            devices = devices.len(),
            published = report.published,
            failed = report.failed,
            evicted = report.evicted,
            "polling tick complete"
        );
        report
    }

    /// Tick every `interval` until `shutdown` flips to `true`.
    ///
    /// A tick that overruns the interval delays the next one instead of
    /// queuing a burst.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = interval.as_secs(), "polling loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!("polling loop stopped");
    }
}
