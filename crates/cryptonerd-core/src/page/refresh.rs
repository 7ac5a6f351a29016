//! Page-side refresh loop.
//!
//! A `PageClient` re-runs its data refresh when the worker posts
//! `{action: "refresh"}`, and on its own schedule when data goes stale.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clients::ClientMessage;
use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// How often the page checks whether anything is due.
const DEFAULT_TICK: StdDuration = StdDuration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshKind {
    /// Prices of the user's favorite coins.
    Favorites,
    /// Market-wide figures (total cap, dominance).
    Global,
}

impl RefreshKind {
    pub const ALL: [RefreshKind; 2] = [RefreshKind::Favorites, RefreshKind::Global];
}

#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    favorites_every: Duration,
    global_every: Duration,
    favorites_at: Option<DateTime<Utc>>,
    global_at: Option<DateTime<Utc>>,
}

impl RefreshSchedule {
    pub fn new(favorites_every: Duration, global_every: Duration) -> Self {
        Self {
            favorites_every,
            global_every,
            favorites_at: None,
            global_at: None,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            Duration::minutes(config.favorites_refresh_minutes),
            Duration::minutes(config.global_refresh_minutes),
        )
    }

    fn slot(&self, kind: RefreshKind) -> (Duration, Option<DateTime<Utc>>) {
        match kind {
            RefreshKind::Favorites => (self.favorites_every, self.favorites_at),
            RefreshKind::Global => (self.global_every, self.global_at),
        }
    }

    /// Never-refreshed data is always due.
    pub fn is_due(&self, kind: RefreshKind, now: DateTime<Utc>) -> bool {
        match self.slot(kind) {
            (_, None) => true,
            (every, Some(at)) => now - at >= every,
        }
    }

    pub fn mark_refreshed(&mut self, kind: RefreshKind, now: DateTime<Utc>) {
        match kind {
            RefreshKind::Favorites => self.favorites_at = Some(now),
            RefreshKind::Global => self.global_at = Some(now),
        }
    }

    pub fn last_refreshed(&self, kind: RefreshKind) -> Option<DateTime<Utc>> {
        self.slot(kind).1
    }
}

#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, kind: RefreshKind) -> Result<(), WorkerError>;
}

pub struct PageClient<R> {
    refresher: R,
    messages: mpsc::UnboundedReceiver<ClientMessage>,
    schedule: RefreshSchedule,
    tick: StdDuration,
}

impl<R: Refresher> PageClient<R> {
    pub fn new(
        refresher: R,
        messages: mpsc::UnboundedReceiver<ClientMessage>,
        schedule: RefreshSchedule,
    ) -> Self {
        Self {
            refresher,
            messages,
            schedule,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: StdDuration) -> Self {
        self.tick = tick;
        self
    }

    pub fn schedule(&self) -> &RefreshSchedule {
        &self.schedule
    }

    /// Run until shutdown is signalled or the worker drops this page.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = self.messages.recv() => match message {
                    Some(ClientMessage::Refresh) => {
                        info!("Worker requested refresh");
                        self.refresh(&RefreshKind::ALL, Utc::now()).await;
                    }
                    None => {
                        debug!("Worker message channel closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let due: Vec<RefreshKind> = RefreshKind::ALL
                        .into_iter()
                        .filter(|kind| self.schedule.is_due(*kind, now))
                        .collect();
                    if !due.is_empty() {
                        self.refresh(&due, now).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self
    }

    /// Failed refreshes stay due and are retried on the next tick.
    async fn refresh(&mut self, kinds: &[RefreshKind], now: DateTime<Utc>) {
        for kind in kinds {
            match self.refresher.refresh(*kind).await {
                Ok(()) => self.schedule.mark_refreshed(*kind, now),
                Err(e) => warn!(?kind, error = %e, "Refresh failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<RefreshKind>>>,
        fail: bool,
    }

    #[async_trait]
    impl Refresher for Recorder {
        async fn refresh(&self, kind: RefreshKind) -> Result<(), WorkerError> {
            self.calls.lock().unwrap().push(kind);
            if self.fail {
                Err(WorkerError::Network("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    fn fresh_schedule() -> RefreshSchedule {
        let mut schedule = RefreshSchedule::new(Duration::minutes(15), Duration::minutes(60));
        let now = Utc::now();
        schedule.mark_refreshed(RefreshKind::Favorites, now);
        schedule.mark_refreshed(RefreshKind::Global, now);
        schedule
    }

    #[test]
    fn test_schedule_staleness() {
        let mut schedule = RefreshSchedule::new(Duration::minutes(15), Duration::minutes(60));
        let t0 = Utc::now();
        assert!(schedule.is_due(RefreshKind::Favorites, t0));

        schedule.mark_refreshed(RefreshKind::Favorites, t0);
        schedule.mark_refreshed(RefreshKind::Global, t0);
        assert!(!schedule.is_due(RefreshKind::Favorites, t0 + Duration::minutes(14)));
        assert!(schedule.is_due(RefreshKind::Favorites, t0 + Duration::minutes(15)));
        assert!(!schedule.is_due(RefreshKind::Global, t0 + Duration::minutes(59)));
        assert!(schedule.is_due(RefreshKind::Global, t0 + Duration::minutes(61)));
    }

    #[test]
    fn test_schedule_from_config() {
        let schedule = RefreshSchedule::from_config(&WorkerConfig::default());
        let t0 = Utc::now();
        let mut s = schedule.clone();
        s.mark_refreshed(RefreshKind::Favorites, t0);
        assert!(s.is_due(RefreshKind::Favorites, t0 + Duration::minutes(15)));
        assert!(schedule.last_refreshed(RefreshKind::Global).is_none());
    }

    #[tokio::test]
    async fn test_refresh_message_runs_every_kind() {
        let recorder = Recorder::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let page = PageClient::new(recorder.clone(), rx, fresh_schedule());

        tx.send(ClientMessage::Refresh).unwrap();
        drop(tx);
        page.run(stop_rx).await;

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![RefreshKind::Favorites, RefreshKind::Global]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_data_refreshes_on_first_tick() {
        let recorder = Recorder::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let schedule = RefreshSchedule::new(Duration::minutes(15), Duration::minutes(60));
        let page = PageClient::new(recorder.clone(), rx, schedule)
            .with_tick(StdDuration::from_millis(5));

        let handle = tokio::spawn(page.run(stop_rx));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        let page = handle.await.unwrap();

        // Refreshed once, then not due again for 15 minutes
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
        assert!(page.schedule().last_refreshed(RefreshKind::Favorites).is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_stays_due() {
        let recorder = Recorder { fail: true, ..Default::default() };
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let schedule = RefreshSchedule::new(Duration::minutes(15), Duration::minutes(60));
        let page = PageClient::new(recorder.clone(), rx, schedule);

        tx.send(ClientMessage::Refresh).unwrap();
        drop(tx);
        let page = page.run(stop_rx).await;

        assert!(page.schedule().last_refreshed(RefreshKind::Favorites).is_none());
        assert!(page.schedule().is_due(RefreshKind::Global, Utc::now()));
    }
}
